use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::face::Dimensions;

/// Capture formats the camera knows how to turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb3,
    Yuyv,
    Grey,
    Other(FourCC),
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Self {
        match &fourcc.repr {
            b"RGB3" => PixelFormat::Rgb3,
            b"YUYV" => PixelFormat::Yuyv,
            b"GREY" => PixelFormat::Grey,
            _ => PixelFormat::Other(fourcc),
        }
    }

    /// Convert one raw buffer to packed RGB.
    pub fn to_rgb(self, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            PixelFormat::Rgb3 => Ok(data.to_vec()),
            PixelFormat::Yuyv => yuyv_to_rgb(width, height, data),
            PixelFormat::Grey => grey_to_rgb(width, height, data),
            PixelFormat::Other(fourcc) => {
                log::warn!(
                    "unexpected pixel format {:?}, passing through raw len={}",
                    fourcc,
                    data.len()
                );
                Ok(data.to_vec())
            }
        }
    }
}

/// V4L2 capture device.
pub struct Camera {
    stream: Stream<'static>,
    dimensions: Dimensions,
    format: PixelFormat,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("opening {device}"))?;
        let current = dev.format().context("reading capture format")?;
        let fmt = negotiate(&dev, current);
        let format = PixelFormat::from_fourcc(fmt.fourcc);
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            format
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
            .context("starting capture stream")?;
        Ok(Self {
            stream,
            dimensions: Dimensions::new(fmt.width, fmt.height),
            format,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Block until the next frame is dequeued and return it as RGB.
    pub fn frame(&mut self) -> Result<RgbImage> {
        let Dimensions { width, height } = self.dimensions;
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame seq={} len={} format={:?}",
            meta.sequence,
            data.len(),
            self.format
        );
        let mut buf = self.format.to_rgb(width, height, data)?;

        let expected = (width * height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!(
                "frame buffer too small: got {}, expected {} ({:?})",
                buf.len(),
                expected,
                self.format
            );
        }
        if buf.len() > expected {
            log::warn!(
                "frame buffer larger than expected ({} > {}), truncating",
                buf.len(),
                expected
            );
            buf.truncate(expected);
        }
        RgbImage::from_raw(width, height, buf).context("failed to build image buffer")
    }
}

/// Prefer RGB, fall back to YUYV, else keep whatever the device already uses.
fn negotiate(dev: &Device, current: Format) -> Format {
    [b"RGB3", b"YUYV"]
        .into_iter()
        .find_map(|code| {
            let wanted = FourCC::new(code);
            let requested = Format::new(current.width, current.height, wanted);
            dev.set_format(&requested)
                .ok()
                .filter(|got| got.fourcc == wanted)
        })
        .unwrap_or(current)
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), expected);
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer: {} < {}", data.len(), expected);
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // Two pixels with Y=100 and Y=200, no chroma.
        let rgb = yuyv_to_rgb(2, 1, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_rgb(4, 4, &[0; 8]).is_err());
    }

    #[test]
    fn test_grey_expands_channels() {
        let rgb = grey_to_rgb(2, 1, &[7, 9, 255]).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), PixelFormat::Yuyv);
        let mjpg = FourCC::new(b"MJPG");
        assert_eq!(PixelFormat::from_fourcc(mjpg), PixelFormat::Other(mjpg));
    }
}
