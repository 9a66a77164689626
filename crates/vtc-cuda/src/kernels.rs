//! NVRTC-compiled colour, resize and pitched-copy kernels.
//!
//! Every kernel mirrors one function in `vtc_host::kernels` and uses the
//! same rounding, so both backends agree to ±1 on arithmetic paths and are
//! bit-identical on copies.
//!
//! # Kernel compilation
//!
//! The CUDA C source is compiled to PTX **once** when the backend is
//! created and loaded into the `CudaDevice` as one module. Function handles
//! are resolved once and reused for every launch.
//!
//! # Addressing
//!
//! Kernels receive a base device pointer plus [`ChannelArg`] descriptors:
//! sample `(x, y)` of a channel lives at `offset + y * pitch + x * step`.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, CudaStream, DeviceRepr, LaunchAsync, LaunchConfig};
use tracing::info;

use vtc_core::error::{EngineError, Result};
use vtc_core::types::{Channel, ColorRange, ColorSpec, Interpolation};

// ─── CUDA C kernel source ────────────────────────────────────────────────────

const KERNELS_CUDA_SRC: &str = r#"
struct Channel {
    unsigned long long offset;
    int pitch;
    int step;
};

struct Channels3 {
    Channel c[3];
};

struct Coeffs {
    float kr;
    float kb;
    float y_offset;
    float y_scale;
    float c_scale;
};

__device__ __forceinline__ unsigned long long at(Channel ch, int x, int y) {
    return ch.offset + (unsigned long long)y * ch.pitch + (unsigned long long)x * ch.step;
}

__device__ __forceinline__ unsigned char to_u8(float v) {
    return (unsigned char)(fminf(fmaxf(v, 0.0f), 255.0f) + 0.5f);
}

__device__ __forceinline__ unsigned char unit_to_u8(float v) {
    return to_u8(fminf(fmaxf(v, 0.0f), 1.0f) * 255.0f);
}

// ============================================================================
// Pitched 2D byte copy
// ============================================================================
extern "C" __global__ void copy_2d(
    const unsigned char* __restrict__ src,
    int src_pitch,
    unsigned char* __restrict__ dst,
    int dst_pitch,
    int width_bytes,
    int rows)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width_bytes || y >= rows) return;
    dst[(long long)y * dst_pitch + x] = src[(long long)y * src_pitch + x];
}

// ============================================================================
// One channel, sample for sample (repack, shuffle, luma extraction)
// ============================================================================
extern "C" __global__ void copy_channel(
    const unsigned char* __restrict__ src,
    Channel s,
    unsigned char* __restrict__ dst,
    Channel d,
    int width,
    int height)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width || y >= height) return;
    dst[at(d, x, y)] = src[at(s, x, y)];
}

// ============================================================================
// YUV (4:2:0 or 4:4:4) → RGB
// ============================================================================
extern "C" __global__ void yuv_to_rgb(
    const unsigned char* __restrict__ src,
    Channels3 yuv,
    int chroma_shift,
    unsigned char* __restrict__ dst,
    Channels3 rgb,
    int width,
    int height,
    Coeffs k)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width || y >= height) return;

    int cx = x >> chroma_shift;
    int cy = y >> chroma_shift;
    float yn = ((float)src[at(yuv.c[0], x, y)] - k.y_offset) / k.y_scale;
    float cb = ((float)src[at(yuv.c[1], cx, cy)] - 128.0f) / k.c_scale;
    float cr = ((float)src[at(yuv.c[2], cx, cy)] - 128.0f) / k.c_scale;

    float r = yn + 2.0f * (1.0f - k.kr) * cr;
    float b = yn + 2.0f * (1.0f - k.kb) * cb;
    float g = (yn - k.kr * r - k.kb * b) / (1.0f - k.kr - k.kb);

    dst[at(rgb.c[0], x, y)] = unit_to_u8(r);
    dst[at(rgb.c[1], x, y)] = unit_to_u8(g);
    dst[at(rgb.c[2], x, y)] = unit_to_u8(b);
}

// ============================================================================
// RGB → YUV, luma pass
// ============================================================================
extern "C" __global__ void rgb_to_luma(
    const unsigned char* __restrict__ src,
    Channels3 rgb,
    unsigned char* __restrict__ dst,
    Channel luma,
    int width,
    int height,
    Coeffs k)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width || y >= height) return;

    float r = (float)src[at(rgb.c[0], x, y)] / 255.0f;
    float g = (float)src[at(rgb.c[1], x, y)] / 255.0f;
    float b = (float)src[at(rgb.c[2], x, y)] / 255.0f;
    float yv = k.kr * r + (1.0f - k.kr - k.kb) * g + k.kb * b;
    dst[at(luma, x, y)] = to_u8(k.y_offset + yv * k.y_scale);
}

// ============================================================================
// RGB → YUV, chroma pass: one thread per chroma sample, averaged over
// (1 << chroma_shift)² pixels
// ============================================================================
extern "C" __global__ void rgb_to_chroma(
    const unsigned char* __restrict__ src,
    Channels3 rgb,
    unsigned char* __restrict__ dst,
    Channel u,
    Channel v,
    int chroma_shift,
    int chroma_width,
    int chroma_height,
    Coeffs k)
{
    int cx = blockIdx.x * blockDim.x + threadIdx.x;
    int cy = blockIdx.y * blockDim.y + threadIdx.y;
    if (cx >= chroma_width || cy >= chroma_height) return;

    int block = 1 << chroma_shift;
    float kg = 1.0f - k.kr - k.kb;
    float cb = 0.0f;
    float cr = 0.0f;
    for (int dy = 0; dy < block; ++dy) {
        for (int dx = 0; dx < block; ++dx) {
            int x = cx * block + dx;
            int y = cy * block + dy;
            float r = (float)src[at(rgb.c[0], x, y)] / 255.0f;
            float g = (float)src[at(rgb.c[1], x, y)] / 255.0f;
            float b = (float)src[at(rgb.c[2], x, y)] / 255.0f;
            float yv = k.kr * r + kg * g + k.kb * b;
            cb += (b - yv) / (2.0f * (1.0f - k.kb));
            cr += (r - yv) / (2.0f * (1.0f - k.kr));
        }
    }
    float n = (float)(block * block);
    dst[at(u, cx, cy)] = to_u8(128.0f + (cb / n) * k.c_scale);
    dst[at(v, cx, cy)] = to_u8(128.0f + (cr / n) * k.c_scale);
}

// ============================================================================
// Plane resample, `channels` interleaved samples per pixel.
// mode 0 = nearest, 1 = bilinear (pixel-centre aligned)
// ============================================================================
extern "C" __global__ void resize_plane(
    const unsigned char* __restrict__ src,
    Channel sp,
    int src_width,
    int src_height,
    unsigned char* __restrict__ dst,
    Channel dp,
    int dst_width,
    int dst_height,
    int channels,
    int mode)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= dst_width || y >= dst_height) return;

    float scale_x = (float)src_width / (float)dst_width;
    float scale_y = (float)src_height / (float)dst_height;

    if (mode == 0) {
        int nx = min((int)(((float)x + 0.5f) * scale_x), src_width - 1);
        int ny = min((int)(((float)y + 0.5f) * scale_y), src_height - 1);
        for (int c = 0; c < channels; ++c) {
            dst[at(dp, x, y) + c] = src[at(sp, nx, ny) + c];
        }
        return;
    }

    float fx = fminf(fmaxf(((float)x + 0.5f) * scale_x - 0.5f, 0.0f), (float)(src_width - 1));
    float fy = fminf(fmaxf(((float)y + 0.5f) * scale_y - 0.5f, 0.0f), (float)(src_height - 1));
    int x0 = (int)fx;
    int y0 = (int)fy;
    int x1 = min(x0 + 1, src_width - 1);
    int y1 = min(y0 + 1, src_height - 1);
    float ax = fx - (float)x0;
    float ay = fy - (float)y0;
    for (int c = 0; c < channels; ++c) {
        float top = (float)src[at(sp, x0, y0) + c] * (1.0f - ax) + (float)src[at(sp, x1, y0) + c] * ax;
        float bottom = (float)src[at(sp, x0, y1) + c] * (1.0f - ax) + (float)src[at(sp, x1, y1) + c] * ax;
        dst[at(dp, x, y) + c] = to_u8(top * (1.0f - ay) + bottom * ay);
    }
}
"#;

const MODULE_NAME: &str = "vtc_kernels";

const KERNEL_NAMES: &[&str] = &[
    "copy_2d",
    "copy_channel",
    "yuv_to_rgb",
    "rgb_to_luma",
    "rgb_to_chroma",
    "resize_plane",
];

// ─── Kernel parameter blocks ─────────────────────────────────────────────────

/// Device-side mirror of [`Channel`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelArg {
    pub offset: u64,
    pub pitch: i32,
    pub step: i32,
}

impl From<Channel> for ChannelArg {
    fn from(c: Channel) -> Self {
        Self {
            offset: c.offset as u64,
            pitch: c.pitch as i32,
            step: c.step as i32,
        }
    }
}

/// Device-side `Channels3`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Channels3Arg {
    pub c: [ChannelArg; 3],
}

impl From<&[Channel; 3]> for Channels3Arg {
    fn from(channels: &[Channel; 3]) -> Self {
        Self {
            c: channels.map(ChannelArg::from),
        }
    }
}

/// Device-side colour matrix; same values as the host kernels use.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoeffsArg {
    pub kr: f32,
    pub kb: f32,
    pub y_offset: f32,
    pub y_scale: f32,
    pub c_scale: f32,
}

impl CoeffsArg {
    pub fn new(color: ColorSpec) -> Self {
        let (kr, kb) = color.luma_coefficients();
        let (y_offset, y_scale, c_scale) = match color.range {
            ColorRange::Limited => (16.0, 219.0, 224.0),
            ColorRange::Full => (0.0, 255.0, 255.0),
        };
        Self {
            kr,
            kb,
            y_offset,
            y_scale,
            c_scale,
        }
    }
}

// SAFETY: plain `#[repr(C)]` values whose layout matches the structs in
// `KERNELS_CUDA_SRC`; they contain no pointers.
unsafe impl DeviceRepr for ChannelArg {}
// SAFETY: see above.
unsafe impl DeviceRepr for Channels3Arg {}
// SAFETY: see above.
unsafe impl DeviceRepr for CoeffsArg {}

// ─── Compiled module ─────────────────────────────────────────────────────────

/// Handles to every kernel of the module.
pub struct Kernels {
    _device: Arc<CudaDevice>,
    copy_2d: CudaFunction,
    copy_channel: CudaFunction,
    yuv_to_rgb: CudaFunction,
    rgb_to_luma: CudaFunction,
    rgb_to_chroma: CudaFunction,
    resize_plane: CudaFunction,
}

impl Kernels {
    /// Compile and load the module on `device`.
    pub fn compile(device: &Arc<CudaDevice>) -> Result<Self> {
        let ptx = cudarc::nvrtc::compile_ptx_with_opts(
            KERNELS_CUDA_SRC,
            cudarc::nvrtc::CompileOptions {
                ftz: Some(false),
                prec_div: Some(true),
                ..Default::default()
            },
        )?;
        device.load_ptx(ptx, MODULE_NAME, KERNEL_NAMES)?;

        let get_fn = |name: &str| -> Result<CudaFunction> {
            device.get_func(MODULE_NAME, name).ok_or_else(|| {
                EngineError::Device(format!(
                    "Kernel function '{name}' not found in module '{MODULE_NAME}'"
                ))
            })
        };

        let kernels = Self {
            _device: Arc::clone(device),
            copy_2d: get_fn("copy_2d")?,
            copy_channel: get_fn("copy_channel")?,
            yuv_to_rgb: get_fn("yuv_to_rgb")?,
            rgb_to_luma: get_fn("rgb_to_luma")?,
            rgb_to_chroma: get_fn("rgb_to_chroma")?,
            resize_plane: get_fn("resize_plane")?,
        };
        info!(
            "NVRTC: compiled {} kernels from module '{MODULE_NAME}'",
            KERNEL_NAMES.len()
        );
        Ok(kernels)
    }

    /// Pitched byte copy of `rows × width_bytes`.
    ///
    /// # Safety
    /// Both regions must lie inside live allocations on this device.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn copy_2d(
        &self,
        stream: &CudaStream,
        src: u64,
        src_pitch: usize,
        dst: u64,
        dst_pitch: usize,
        width_bytes: usize,
        rows: usize,
    ) -> Result<()> {
        if width_bytes == 0 || rows == 0 {
            return Ok(());
        }
        let config = launch_config_2d(width_bytes as u32, rows as u32);
        unsafe {
            self.copy_2d.clone().launch_on_stream(
                stream,
                config,
                (
                    src,
                    src_pitch as i32,
                    dst,
                    dst_pitch as i32,
                    width_bytes as i32,
                    rows as i32,
                ),
            )?;
        }
        Ok(())
    }

    /// # Safety
    /// Every addressed sample must lie inside the allocations at `src`/`dst`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn copy_channel(
        &self,
        stream: &CudaStream,
        src: u64,
        s: Channel,
        dst: u64,
        d: Channel,
        width: usize,
        height: usize,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let config = launch_config_2d(width as u32, height as u32);
        unsafe {
            self.copy_channel.clone().launch_on_stream(
                stream,
                config,
                (
                    src,
                    ChannelArg::from(s),
                    dst,
                    ChannelArg::from(d),
                    width as i32,
                    height as i32,
                ),
            )?;
        }
        Ok(())
    }

    /// # Safety
    /// Every addressed sample must lie inside the allocations at `src`/`dst`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn yuv_to_rgb(
        &self,
        stream: &CudaStream,
        src: u64,
        yuv: &[Channel; 3],
        chroma_shift: u32,
        dst: u64,
        rgb: &[Channel; 3],
        width: usize,
        height: usize,
        coeffs: CoeffsArg,
    ) -> Result<()> {
        let config = launch_config_2d(width as u32, height as u32);
        unsafe {
            self.yuv_to_rgb.clone().launch_on_stream(
                stream,
                config,
                (
                    src,
                    Channels3Arg::from(yuv),
                    chroma_shift as i32,
                    dst,
                    Channels3Arg::from(rgb),
                    width as i32,
                    height as i32,
                    coeffs,
                ),
            )?;
        }
        Ok(())
    }

    /// Luma pass then chroma pass; `chroma_shift` is 1 for 4:2:0.
    ///
    /// # Safety
    /// Every addressed sample must lie inside the allocations at `src`/`dst`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn rgb_to_yuv(
        &self,
        stream: &CudaStream,
        src: u64,
        rgb: &[Channel; 3],
        dst: u64,
        yuv: &[Channel; 3],
        chroma_shift: u32,
        width: usize,
        height: usize,
        coeffs: CoeffsArg,
    ) -> Result<()> {
        let rgb = Channels3Arg::from(rgb);
        unsafe {
            self.rgb_to_luma.clone().launch_on_stream(
                stream,
                launch_config_2d(width as u32, height as u32),
                (
                    src,
                    rgb,
                    dst,
                    ChannelArg::from(yuv[0]),
                    width as i32,
                    height as i32,
                    coeffs,
                ),
            )?;
        }
        let (cw, ch) = (width >> chroma_shift, height >> chroma_shift);
        if cw == 0 || ch == 0 {
            return Ok(());
        }
        unsafe {
            self.rgb_to_chroma.clone().launch_on_stream(
                stream,
                launch_config_2d(cw as u32, ch as u32),
                (
                    src,
                    rgb,
                    dst,
                    ChannelArg::from(yuv[1]),
                    ChannelArg::from(yuv[2]),
                    chroma_shift as i32,
                    cw as i32,
                    ch as i32,
                    coeffs,
                ),
            )?;
        }
        Ok(())
    }

    /// # Safety
    /// Every addressed sample must lie inside the allocations at `src`/`dst`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn resize_plane(
        &self,
        stream: &CudaStream,
        src: u64,
        src_plane: Channel,
        src_size: (usize, usize),
        dst: u64,
        dst_plane: Channel,
        dst_size: (usize, usize),
        channels: usize,
        interpolation: Interpolation,
    ) -> Result<()> {
        let mode = match interpolation {
            Interpolation::Nearest => 0i32,
            Interpolation::Bilinear => 1i32,
        };
        let config = launch_config_2d(dst_size.0 as u32, dst_size.1 as u32);
        unsafe {
            self.resize_plane.clone().launch_on_stream(
                stream,
                config,
                (
                    src,
                    ChannelArg::from(src_plane),
                    src_size.0 as i32,
                    src_size.1 as i32,
                    dst,
                    ChannelArg::from(dst_plane),
                    dst_size.0 as i32,
                    dst_size.1 as i32,
                    channels as i32,
                    mode,
                ),
            )?;
        }
        Ok(())
    }
}

/// Standard 2D launch config: 16×16 blocks.
pub(crate) fn launch_config_2d(width: u32, height: u32) -> LaunchConfig {
    let block = (16u32, 16u32, 1u32);
    LaunchConfig {
        grid_dim: (width.div_ceil(block.0), height.div_ceil(block.1), 1),
        block_dim: block,
        shared_mem_bytes: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtc_core::types::{ColorSpace, PixelFormat};

    #[test]
    fn channel_arg_layout_matches_the_device_struct() {
        assert_eq!(std::mem::size_of::<ChannelArg>(), 16);
        assert_eq!(std::mem::align_of::<ChannelArg>(), 8);
        assert_eq!(std::mem::size_of::<Channels3Arg>(), 48);
        assert_eq!(std::mem::size_of::<CoeffsArg>(), 20);
    }

    #[test]
    fn nv12_chroma_channels_interleave() {
        let map = PixelFormat::Nv12.channel_map(4, 256);
        let args = Channels3Arg::from(&map.channels);
        assert_eq!(args.c[1].offset, 1024);
        assert_eq!(args.c[2].offset, 1025);
        assert_eq!((args.c[1].step, args.c[1].pitch), (2, 256));
    }

    #[test]
    fn coefficients_follow_range() {
        let full = CoeffsArg::new(ColorSpec {
            space: ColorSpace::Bt601,
            range: ColorRange::Full,
        });
        assert_eq!((full.kr, full.kb), (0.299, 0.114));
        assert_eq!((full.y_offset, full.y_scale, full.c_scale), (0.0, 255.0, 255.0));

        let limited = CoeffsArg::new(ColorSpec::default());
        assert_eq!((limited.y_offset, limited.y_scale, limited.c_scale), (16.0, 219.0, 224.0));
    }

    #[test]
    fn launch_grid_covers_the_frame() {
        let config = launch_config_2d(1920, 1080);
        assert_eq!(config.block_dim, (16, 16, 1));
        assert_eq!(config.grid_dim, (120, 68, 1));
    }
}
