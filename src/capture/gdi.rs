//! Desktop capture with GDI BitBlt.
//!
//! The game runs fullscreen-windowed, so a plain desktop blit sees the same
//! pixels the player does and needs no window handle.

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use std::ffi::c_void;
use tracing::debug;

use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
    GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    DIB_RGB_COLORS, HGDIOBJ, SRCCOPY,
};

use super::ScreenCapture;
use crate::automation::config::ScreenRect;

pub struct GdiCapture;

impl ScreenCapture for GdiCapture {
    fn capture(&self, region: &ScreenRect) -> Result<RgbaImage> {
        let width = region.width as i32;
        let height = region.height as i32;
        if width == 0 || height == 0 {
            return Err(anyhow!("Cannot capture empty region {:?}", region));
        }

        let mut buffer = vec![0u8; region.width as usize * region.height as usize * 4];

        unsafe {
            let screen_dc = GetDC(HWND::default());
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let previous = SelectObject(mem_dc, HGDIOBJ(bitmap.0));

            let blit = BitBlt(
                mem_dc,
                0,
                0,
                width,
                height,
                screen_dc,
                region.left,
                region.top,
                SRCCOPY,
            );

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    // Negative height: top-down rows
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(buffer.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            );

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(HGDIOBJ(bitmap.0));
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen_dc);

            blit.map_err(|e| anyhow!("BitBlt failed: {}", e))?;
            if lines != height {
                return Err(anyhow!("GetDIBits copied {} of {} rows", lines, height));
            }
        }

        // BGRA -> RGBA
        for pixel in buffer.chunks_exact_mut(4) {
            pixel.swap(0, 2);
            pixel[3] = 255;
        }

        let img: RgbaImage = ImageBuffer::<Rgba<u8>, _>::from_raw(region.width, region.height, buffer)
            .ok_or_else(|| anyhow!("Captured buffer has the wrong size"))?;
        debug!("Captured {:?}", region);
        Ok(img)
    }
}
