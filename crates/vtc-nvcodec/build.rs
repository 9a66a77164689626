//! Build script: locate the CUDA toolkit and link the Video Codec SDK.
//!
//! Links only when the `nvcodec-runtime` feature is on and a CUDA root is
//! found; otherwise sets `vtc_nvcodec_stub` and the crate compiles its
//! stand-in sessions.
//!
//! Environment:
//!   CUDA_PATH    CUDA toolkit root (falls back to /usr/local/cuda*)
//!   NVCODEC_DIR  directory holding nvcuvid / nvencodeapi import libraries

use std::env;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
fn find_linux_cuda_root() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("/usr/local/cuda")];
    if let Ok(entries) = std::fs::read_dir("/usr/local") {
        let mut versioned = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("cuda-"))
            })
            .collect::<Vec<_>>();
        versioned.sort();
        versioned.reverse();
        candidates.extend(versioned);
    }
    candidates.into_iter().find(|root| root.exists())
}

#[cfg(not(target_os = "linux"))]
fn find_linux_cuda_root() -> Option<PathBuf> {
    None
}

fn resolve_cuda_root() -> Option<PathBuf> {
    if let Ok(cuda_path) = env::var("CUDA_PATH") {
        return Some(PathBuf::from(cuda_path));
    }
    let root = find_linux_cuda_root()?;
    println!(
        "cargo:warning=CUDA_PATH is unset; using discovered CUDA root at {}",
        root.display()
    );
    Some(root)
}

fn stub(reason: &str) {
    println!("cargo:warning=vtc-nvcodec: {reason}; building stub sessions");
    println!("cargo:rustc-cfg=vtc_nvcodec_stub");
}

fn main() {
    println!("cargo:rustc-check-cfg=cfg(vtc_nvcodec_stub)");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");
    println!("cargo:rerun-if-env-changed=NVCODEC_DIR");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_NVCODEC_RUNTIME").is_none() {
        println!("cargo:rustc-cfg=vtc_nvcodec_stub");
        return;
    }
    if env::var_os("DOCS_RS").is_some() {
        stub("DOCS_RS detected");
        return;
    }

    // ── CUDA Toolkit ────────────────────────────────────────────────────────

    let Some(cuda_root) = resolve_cuda_root() else {
        stub("CUDA toolkit not found (CUDA_PATH unset and /usr/local/cuda* missing)");
        return;
    };

    let cuda_lib_dir = if cfg!(target_os = "windows") {
        cuda_root.join("lib").join("x64")
    } else {
        let wsl_style = cuda_root.join("targets").join("x86_64-linux").join("lib");
        if wsl_style.exists() {
            wsl_style
        } else {
            cuda_root.join("lib64")
        }
    };
    if !cuda_lib_dir.exists() {
        stub(&format!(
            "CUDA library directory not found at {}",
            cuda_lib_dir.display()
        ));
        return;
    }
    println!("cargo:rustc-link-search=native={}", cuda_lib_dir.display());

    // Driver libraries often live outside the toolkit (WSL2 in particular).
    if cfg!(target_os = "linux") {
        for extra in ["/usr/lib/wsl/lib", "/usr/local/lib/wsl-nvidia"] {
            let p = PathBuf::from(extra);
            if p.exists() {
                println!("cargo:rustc-link-search=native={}", p.display());
            }
        }
    }
    println!("cargo:rustc-link-lib=dylib=cuda");

    // ── Video Codec SDK (nvcuvid + nvEncodeAPI) ─────────────────────────────

    if let Some(dir) = env::var_os("NVCODEC_DIR").map(PathBuf::from) {
        if dir.exists() {
            println!("cargo:rustc-link-search=native={}", dir.display());
        } else {
            println!(
                "cargo:warning=NVCODEC_DIR {} does not exist; relying on the CUDA lib dir",
                dir.display()
            );
        }
    }

    println!("cargo:rustc-link-lib=dylib=nvcuvid");
    if cfg!(target_os = "windows") {
        println!("cargo:rustc-link-lib=dylib=nvencodeapi");
    } else {
        println!("cargo:rustc-link-lib=dylib=nvidia-encode");
    }
}
