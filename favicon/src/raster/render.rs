use crate::raster::encode::{encode_rgba, EncodeOptions};
use crate::raster::{Fit, Kernel, RasterEncoder, RasterError, ResizeOptions, SourceImage};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};

/// Renders SVG sources with resvg and raster sources with the `image` crate.
///
/// The work runs on the blocking pool so multiple sizes render in parallel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEncoder;

#[async_trait::async_trait]
impl RasterEncoder for NativeEncoder {
    async fn encode(
        &self,
        source: &SourceImage,
        size: u32,
        resize: &ResizeOptions,
        encode: &EncodeOptions,
    ) -> Result<Vec<u8>, RasterError> {
        let source = source.clone();
        let resize = resize.clone();
        let encode = *encode;

        tokio::task::spawn_blocking(move || {
            let image = if source.format().is_vector() {
                render_svg(&source, size, &resize)?
            } else {
                render_raster(&source, size, &resize)?
            };

            encode_rgba(size, size, image.as_raw(), &encode)
        })
        .await?
    }
}

/// Computes the transform that maps an SVG viewport of `width`x`height` onto
/// the square target according to `fit`.
fn fit_transform(fit: Fit, width: f32, height: f32, size: u32) -> tiny_skia::Transform {
    let target = size as f32;
    let x_scale = target / width;
    let y_scale = target / height;

    let (sx, sy) = match fit {
        Fit::Contain => {
            let scale = x_scale.min(y_scale);
            (scale, scale)
        }
        Fit::Cover => {
            let scale = x_scale.max(y_scale);
            (scale, scale)
        }
        Fit::Fill => (x_scale, y_scale),
    };

    // Center the scaled viewport
    tiny_skia::Transform {
        sx,
        sy,
        tx: (target - width * sx) / 2.0,
        ty: (target - height * sy) / 2.0,
        ..Default::default()
    }
}

fn render_svg(
    source: &SourceImage,
    size: u32,
    resize: &ResizeOptions,
) -> Result<RgbaImage, RasterError> {
    // Parse the icon, compressed input is inflated by usvg
    let parse_options = usvg::Options {
        resources_dir: source.resources_dir().map(|dir| dir.to_path_buf()),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(source.data(), &parse_options)?;

    // Construct a pixmap to render to
    let mut pixmap = tiny_skia::Pixmap::new(size, size).ok_or(
        RasterError::InvalidPixmapDimensions {
            width: size,
            height: size,
        },
    )?;

    let [r, g, b, a] = resize.background;
    if a != 0 {
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, a));
    }

    let transform = fit_transform(
        resize.fit,
        tree.size().width(),
        tree.size().height(),
        size,
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    pixmap_to_image(&pixmap)
}

/// Converts the premultiplied pixmap into straight alpha RGBA.
fn pixmap_to_image(pixmap: &tiny_skia::Pixmap) -> Result<RgbaImage, RasterError> {
    let mut pixels = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        pixels.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }

    RgbaImage::from_raw(pixmap.width(), pixmap.height(), pixels).ok_or(
        RasterError::InvalidPixmapDimensions {
            width: pixmap.width(),
            height: pixmap.height(),
        },
    )
}

fn render_raster(
    source: &SourceImage,
    size: u32,
    resize: &ResizeOptions,
) -> Result<RgbaImage, RasterError> {
    let decoded = image::load_from_memory(source.data())?;
    let filter = filter_type(resize.kernel);

    let resized = match resize.fit {
        Fit::Contain => decoded.resize(size, size, filter),
        Fit::Cover => decoded.resize_to_fill(size, size, filter),
        Fit::Fill => decoded.resize_exact(size, size, filter),
    }
    .to_rgba8();

    // Composite onto the padding color, centered
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba(resize.background));
    let x = (size.saturating_sub(resized.width()) / 2) as i64;
    let y = (size.saturating_sub(resized.height()) / 2) as i64;
    image::imageops::overlay(&mut canvas, &resized, x, y);

    Ok(canvas)
}

fn filter_type(kernel: Kernel) -> FilterType {
    match kernel {
        Kernel::Nearest => FilterType::Nearest,
        Kernel::Triangle => FilterType::Triangle,
        Kernel::CatmullRom => FilterType::CatmullRom,
        Kernel::Lanczos3 => FilterType::Lanczos3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{EncodeOverrides, InputFormat};

    const SQUARE_SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10">
        <rect width="10" height="10" fill="#ff0000"/>
    </svg>"##;

    const WIDE_SVG: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="10">
        <rect width="20" height="10" fill="#00ff00"/>
    </svg>"##;

    fn decode(png_data: &[u8]) -> RgbaImage {
        image::load_from_memory(png_data).unwrap().to_rgba8()
    }

    fn options() -> EncodeOptions {
        EncodeOptions::derive(false, &EncodeOverrides::default())
    }

    #[test]
    fn contain_centers_the_viewport() {
        let transform = fit_transform(Fit::Contain, 20.0, 10.0, 32);
        assert_eq!(transform.sx, 1.6);
        assert_eq!(transform.sy, 1.6);
        assert!(transform.tx.abs() < 1e-4);
        assert!((transform.ty - 8.0).abs() < 1e-4);
    }

    #[test]
    fn fill_ignores_aspect_ratio() {
        let transform = fit_transform(Fit::Fill, 20.0, 10.0, 40);
        assert_eq!(transform.sx, 2.0);
        assert_eq!(transform.sy, 4.0);
        assert_eq!(transform.tx, 0.0);
        assert_eq!(transform.ty, 0.0);
    }

    #[tokio::test]
    async fn renders_svg_at_requested_size() {
        let source = SourceImage::with_format(InputFormat::Svg, SQUARE_SVG.to_vec());
        let png_data = NativeEncoder
            .encode(&source, 16, &ResizeOptions::default(), &options())
            .await
            .unwrap();

        let image = decode(&png_data);
        assert_eq!(image.dimensions(), (16, 16));
        assert_eq!(image.get_pixel(8, 8).0, [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn contain_pads_with_transparency() {
        let source = SourceImage::with_format(InputFormat::Svg, WIDE_SVG.to_vec());
        let png_data = NativeEncoder
            .encode(&source, 32, &ResizeOptions::default(), &options())
            .await
            .unwrap();

        let image = decode(&png_data);
        assert_eq!(image.get_pixel(16, 0).0[3], 0);
        assert_eq!(image.get_pixel(16, 16).0, [0, 255, 0, 255]);
    }

    #[tokio::test]
    async fn raster_sources_are_resized_and_padded() {
        let wide = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 255, 255]));
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgba8(wide)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        let source = SourceImage::from_bytes(encoded).unwrap();
        assert_eq!(source.format(), InputFormat::Png);

        let resize = ResizeOptions {
            kernel: Kernel::Nearest,
            ..Default::default()
        };
        let png_data = NativeEncoder
            .encode(&source, 20, &resize, &options())
            .await
            .unwrap();

        let image = decode(&png_data);
        assert_eq!(image.dimensions(), (20, 20));
        assert_eq!(image.get_pixel(10, 0).0[3], 0);
        assert_eq!(image.get_pixel(10, 10).0, [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn corrupt_svg_is_a_decode_error() {
        let source = SourceImage::with_format(InputFormat::Svg, b"<svg".to_vec());
        let err = NativeEncoder
            .encode(&source, 16, &ResizeOptions::default(), &options())
            .await
            .unwrap_err();
        assert!(err.is_decode());
    }
}
