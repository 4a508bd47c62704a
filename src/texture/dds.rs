//! DDS header parsing and pixel decoding.

use image::RgbaImage;
use serde::Serialize;

use crate::cursor::ByteReader;
use crate::error::{CodecError, Result};

pub const DDS_MAGIC: [u8; 4] = *b"DDS ";
const DDS_HEADER_SIZE: u32 = 124;
const DDS_DATA_OFFSET: usize = 128;
const DX10_DATA_OFFSET: usize = 148;

const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DdsFormat {
    Bc1,
    Bc2,
    Bc3,
    Bc4,
    Bc5,
    Bc7,
    Rgba8,
    Bgra8,
}

impl DdsFormat {
    fn block_bytes(self) -> Option<usize> {
        match self {
            DdsFormat::Bc1 | DdsFormat::Bc4 => Some(8),
            DdsFormat::Bc2 | DdsFormat::Bc3 | DdsFormat::Bc5 | DdsFormat::Bc7 => Some(16),
            DdsFormat::Rgba8 | DdsFormat::Bgra8 => None,
        }
    }

    /// Bytes needed for the top mip level.
    pub fn surface_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self.block_bytes() {
            Some(block) => w.div_ceil(4).max(1) * h.div_ceil(4).max(1) * block,
            None => w * h * 4,
        }
    }

    fn from_fourcc(fourcc: &[u8; 4]) -> Option<DdsFormat> {
        match fourcc {
            b"DXT1" | b"BC1 " => Some(DdsFormat::Bc1),
            b"DXT2" | b"DXT3" | b"BC2 " => Some(DdsFormat::Bc2),
            b"DXT4" | b"DXT5" | b"BC3 " => Some(DdsFormat::Bc3),
            b"ATI1" | b"BC4U" | b"BC4 " => Some(DdsFormat::Bc4),
            b"ATI2" | b"BC5U" | b"BC5 " => Some(DdsFormat::Bc5),
            _ => None,
        }
    }

    fn from_dxgi(dxgi: u32) -> Option<DdsFormat> {
        match dxgi {
            28 | 29 => Some(DdsFormat::Rgba8),
            71 | 72 => Some(DdsFormat::Bc1),
            74 | 75 => Some(DdsFormat::Bc2),
            77 | 78 => Some(DdsFormat::Bc3),
            80 | 81 => Some(DdsFormat::Bc4),
            83 | 84 => Some(DdsFormat::Bc5),
            87 | 91 => Some(DdsFormat::Bgra8),
            98 | 99 => Some(DdsFormat::Bc7),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdsHeader {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    /// Recognised pixel format, or a description of the one found.
    pub format: std::result::Result<DdsFormat, String>,
    pub data_offset: usize,
}

pub fn parse_dds_header(data: &[u8]) -> Result<DdsHeader> {
    let mut r = ByteReader::new(data);
    if r.read_bytes(4)? != DDS_MAGIC {
        return Err(CodecError::unrecognized("DDS", "magic is not 'DDS '"));
    }
    let size = r.read_u32()?;
    if size != DDS_HEADER_SIZE {
        return Err(CodecError::unrecognized(
            "DDS",
            format!("header size {} (expected 124)", size),
        ));
    }
    r.seek(12)?;
    let height = r.read_u32()?;
    let width = r.read_u32()?;
    r.seek(28)?;
    let mip_count = r.read_u32()?;
    r.seek(80)?;
    let pf_flags = r.read_u32()?;
    let fourcc: [u8; 4] = r
        .read_bytes(4)?
        .try_into()
        .map_err(|_| CodecError::unrecognized("DDS", "fourcc"))?;
    let bit_count = r.read_u32()?;
    let red_mask = r.read_u32()?;

    let (format, data_offset) = if pf_flags & DDPF_FOURCC != 0 && &fourcc == b"DX10" {
        r.seek(DDS_DATA_OFFSET)?;
        let dxgi = r.read_u32()?;
        let format = DdsFormat::from_dxgi(dxgi).ok_or_else(|| format!("DX10 format {}", dxgi));
        (format, DX10_DATA_OFFSET)
    } else if pf_flags & DDPF_FOURCC != 0 {
        let format = DdsFormat::from_fourcc(&fourcc).ok_or_else(|| {
            format!("fourcc '{}'", String::from_utf8_lossy(&fourcc).trim_end())
        });
        (format, DDS_DATA_OFFSET)
    } else if pf_flags & DDPF_RGB != 0 && bit_count == 32 {
        let format = match red_mask {
            0x00FF_0000 => Ok(DdsFormat::Bgra8),
            0x0000_00FF => Ok(DdsFormat::Rgba8),
            other => Err(format!("32-bit RGB with red mask {:#010x}", other)),
        };
        (format, DDS_DATA_OFFSET)
    } else {
        (
            Err(format!("pixel format flags {:#x}, {} bits", pf_flags, bit_count)),
            DDS_DATA_OFFSET,
        )
    };

    Ok(DdsHeader {
        width,
        height,
        mip_count,
        format,
        data_offset,
    })
}

fn bgra_to_rgba(pixels: &[u32], width: u32, height: u32) -> Option<RgbaImage> {
    let mut raw = Vec::with_capacity(pixels.len() * 4);
    for p in pixels {
        raw.extend_from_slice(&[(p >> 16) as u8, (p >> 8) as u8, *p as u8, (p >> 24) as u8]);
    }
    RgbaImage::from_raw(width, height, raw)
}

/// Decode the top mip level of a DDS image with a known format.
///
/// Missing pixel bytes are a truncation error. A decoder failure on well-sized
/// data comes back as `Ok(None)` so callers can keep the raw bytes.
pub fn decode_dds(data: &[u8], header: &DdsHeader, format: DdsFormat) -> Result<Option<RgbaImage>> {
    let (width, height) = (header.width, header.height);
    let needed = format.surface_size(width, height);
    let r = ByteReader::new(data);
    r.require(header.data_offset, needed)?;
    let surface = &data[header.data_offset..header.data_offset + needed];

    let image = match format {
        DdsFormat::Rgba8 => RgbaImage::from_raw(width, height, surface.to_vec()),
        DdsFormat::Bgra8 => {
            let mut raw = surface.to_vec();
            raw.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
            RgbaImage::from_raw(width, height, raw)
        }
        block => {
            let (w, h) = (width as usize, height as usize);
            let mut pixels = vec![0u32; w * h];
            let decoded = match block {
                DdsFormat::Bc1 => texture2ddecoder::decode_bc1(surface, w, h, &mut pixels),
                DdsFormat::Bc2 => texture2ddecoder::decode_bc2(surface, w, h, &mut pixels),
                DdsFormat::Bc3 => texture2ddecoder::decode_bc3(surface, w, h, &mut pixels),
                DdsFormat::Bc4 => texture2ddecoder::decode_bc4(surface, w, h, &mut pixels),
                DdsFormat::Bc5 => texture2ddecoder::decode_bc5(surface, w, h, &mut pixels),
                DdsFormat::Bc7 => texture2ddecoder::decode_bc7(surface, w, h, &mut pixels),
                DdsFormat::Rgba8 | DdsFormat::Bgra8 => Ok(()),
            };
            match decoded {
                Ok(()) => bgra_to_rgba(&pixels, width, height),
                Err(reason) => {
                    tracing::debug!(?format, reason, "block decoder rejected surface");
                    None
                }
            }
        }
    };
    Ok(image)
}
