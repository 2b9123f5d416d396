use paintfe_tiles::geometry::Rect;
use paintfe_tiles::{ChannelLayout, PaintDevice, Painter, RandomSource};

#[test_log::test]
fn half_opaque_red_dab_on_transparent_device() {
    let dev = PaintDevice::new(ChannelLayout::rgba8(), &[0, 0, 0, 0]).unwrap();
    let dab = [255u8, 0, 0, 255].repeat(100);
    let mut painter = Painter::new(&dev);
    painter.set_composite_op("over").unwrap();
    painter.set_opacity(128.0 / 255.0);
    painter.bit_blt_buffer(5, 5, &dab, 10, 10, None).unwrap();

    assert_eq!(dev.pixel(5, 5), [255u8, 0, 0, 128]);
    assert_eq!(dev.pixel(14, 14), [255u8, 0, 0, 128]);
    assert_eq!(dev.pixel(20, 20), [0u8, 0, 0, 0]);
    assert_eq!(dev.pixel(4, 5), [0u8, 0, 0, 0]);
    assert_eq!(dev.tile_count(), 1);
    assert_eq!(painter.take_dirty_rect(), Some(Rect::new(5, 5, 10, 10)));
}

#[test]
fn strokes_across_tiles_and_devices() {
    let layer = PaintDevice::new(ChannelLayout::rgba8(), &[0; 4]).unwrap();
    let mut painter = Painter::new(&layer);
    painter.fill_rect(Rect::new(-40, -40, 80, 80), &[0, 0, 255, 255]).unwrap();
    painter.set_composite_op("multiply").unwrap();
    painter.fill_rect(Rect::new(0, 0, 100, 100), &[255, 128, 128, 255]).unwrap();

    assert_eq!(layer.pixel(-1, -1), [0u8, 0, 255, 255]);
    assert_eq!(layer.pixel(10, 10), [0u8, 0, 128, 255]);
    // Multiply does not paint where the layer is empty.
    assert_eq!(layer.pixel(50, 50), [0u8; 4]);

    let snapshot = layer.duplicate().unwrap();
    painter.set_composite_op("erase").unwrap();
    painter.fill_rect(Rect::new(-40, -40, 80, 80), &[0, 0, 0, 255]).unwrap();
    assert_eq!(layer.pixel(-1, -1)[3], 0);
    assert_eq!(snapshot.pixel(-1, -1), [0u8, 0, 255, 255]);

    let canvas = PaintDevice::new(ChannelLayout::rgba8(), &[255; 4]).unwrap();
    let mut p = Painter::new(&canvas);
    p.bit_blt_device(&snapshot, Rect::new(-40, -40, 80, 80), 0, 0).unwrap();
    assert_eq!(canvas.pixel(39, 39), [0u8, 0, 255, 255]);
    assert_eq!(canvas.pixel(79, 79), [0u8, 0, 128, 255]);
    assert_eq!(canvas.pixel(80, 80), [255u8; 4]);
}

#[test]
fn seeded_dissolve_stroke_replays_exactly() {
    let paint = |seed: u64| {
        let dev = PaintDevice::new(ChannelLayout::rgba8(), &[0; 4]).unwrap();
        let mut p = Painter::new(&dev);
        p.set_composite_op("dissolve").unwrap();
        p.set_random_source(RandomSource::new(seed));
        p.set_opacity(0.3);
        for i in 0..5 {
            p.fill_rect(Rect::new(i * 30, 0, 70, 70), &[1, 2, 3, 255]).unwrap();
        }
        dev.read_vec(Rect::new(0, 0, 200, 70)).unwrap()
    };
    assert_eq!(paint(5), paint(5));
    assert_ne!(paint(5), paint(6));
}

#[test]
fn image_round_trip_through_device() {
    let mut img = image::RgbaImage::new(100, 70);
    for (x, y, p) in img.enumerate_pixels_mut() {
        *p = image::Rgba([x as u8, y as u8, 0, if (x + y) % 3 == 0 { 0 } else { 255 }]);
    }
    let dev = PaintDevice::from_rgba_image(&img).unwrap();
    assert_eq!(dev.to_rgba_image(Rect::new(0, 0, 100, 70)).unwrap(), img);

    let gray = PaintDevice::new(ChannelLayout::graya8(), &[0, 0]).unwrap();
    assert!(gray.to_rgba_image(Rect::new(0, 0, 1, 1)).is_err());
}
