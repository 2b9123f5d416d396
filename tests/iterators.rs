use paintfe_tiles::geometry::Rect;
use paintfe_tiles::{ChannelLayout, PaintDevice};

/// Unique, position-derived pixel so misplaced writes show up.
fn stamp(x: i32, y: i32) -> [u8; 4] {
    [x as u8, y as u8, (x >> 8) as u8 ^ 0x55, (y >> 8) as u8 ^ 0xAA]
}

fn device() -> PaintDevice {
    PaintDevice::new(ChannelLayout::rgba8(), &[0; 4]).unwrap()
}

fn fill_with_rect_cursor(dev: &PaintDevice, rect: Rect) {
    let mut it = dev.rect_iter_mut(rect);
    while it.next_pixel() {
        let (x, y) = (it.x(), it.y());
        it.write(&stamp(x, y)).unwrap();
    }
}

fn check_rect(dev: &PaintDevice, rect: Rect) {
    let mut n = 0;
    for p in dev.rect_iter(rect) {
        assert_eq!(p.pixel, stamp(p.x, p.y), "at ({}, {})", p.x, p.y);
        n += 1;
    }
    assert_eq!(n, rect.area());
}

#[test]
fn rect_cursor_covers_every_pixel_once() {
    for rect in [
        Rect::new(0, 0, 64, 64),
        Rect::new(0, 0, 128, 128),
        Rect::new(-10, -10, 20, 20),
        Rect::new(-100, 50, 200, 20),
    ] {
        let dev = device();
        fill_with_rect_cursor(&dev, rect);
        check_rect(&dev, rect);
        assert_eq!(dev.tile_count(), rect.tiles().count());
        // Nothing outside was touched.
        assert_eq!(dev.pixel(rect.x - 1, rect.y), [0u8; 4]);
        assert_eq!(dev.pixel(rect.right(), rect.bottom() - 1), [0u8; 4]);
    }
}

#[test]
fn hline_rows_match_rect_iteration() {
    let dev = device();
    let rect = Rect::new(-70, -3, 150, 6);
    let mut it = dev.hline_iter_mut(rect.x, rect.y, rect.width);
    for _ in 0..rect.height {
        while it.next_pixel() {
            let (x, y) = (it.x(), it.y());
            it.write(&stamp(x, y)).unwrap();
        }
        it.next_row();
    }
    check_rect(&dev, rect);

    let mut row = dev.hline_iter(rect.x, rect.y, rect.width);
    assert_eq!(row.len(), 150);
    row.next_row();
    assert_eq!(row.next().unwrap().y, rect.y + 1);
}

#[test]
fn vline_columns_match_rect_iteration() {
    let dev = device();
    let rect = Rect::new(60, -66, 8, 140);
    let mut it = dev.vline_iter_mut(rect.x, rect.y, rect.height);
    for _ in 0..rect.width {
        while it.next_pixel() {
            let (x, y) = (it.x(), it.y());
            it.write(&stamp(x, y)).unwrap();
        }
        it.next_column();
    }
    check_rect(&dev, rect);

    let col: Vec<_> = dev.vline_iter(63, -66, 140).collect();
    assert_eq!(col.len(), 140);
    assert!(col.iter().all(|p| p.x == 63 && p.pixel == stamp(p.x, p.y)));
}

#[test]
fn raw_data_mut_edits_in_place() {
    let dev = device();
    let mut it = dev.rect_iter_mut(Rect::new(62, 62, 4, 4));
    while it.next_pixel() {
        let mut px = it.raw_data_mut().unwrap();
        px[3] = 255;
    }
    for p in dev.rect_iter(Rect::new(62, 62, 4, 4)) {
        assert_eq!(p.pixel, [0u8, 0, 0, 255]);
    }
    assert_eq!(dev.tile_count(), 4);
}

#[test]
fn random_accessor_agrees_with_iterators() {
    let dev = device();
    let rect = Rect::new(-20, -20, 200, 20);
    fill_with_rect_cursor(&dev, rect);

    let mut acc = dev.random_accessor();
    for (x, y) in [(-20, -20), (0, -1), (63, -5), (64, -5), (179, -1)] {
        acc.move_to(x, y);
        assert_eq!(acc.raw_data(), &stamp(x, y));
        assert_eq!(acc.num_contiguous_columns(), dev.num_contiguous_columns(x));
        assert_eq!(acc.num_contiguous_rows(), dev.num_contiguous_rows(y));
    }

    let mut w = dev.random_accessor_mut();
    w.move_to(500, 500);
    w.write(&[1, 2, 3, 4]).unwrap();
    assert_eq!(w.read(), [1u8, 2, 3, 4]);
    assert!(w.write(&[1, 2]).is_err());
    assert_eq!(dev.pixel(500, 500), [1u8, 2, 3, 4]);
}

#[test]
fn lines_ending_at_the_coordinate_limit_stop_there() {
    let dev = device();
    assert_eq!(dev.hline_iter(i32::MAX - 3, 0, 10).count(), 3);
    assert_eq!(dev.vline_iter(0, i32::MAX - 2, 50).count(), 2);

    let mut h = dev.hline_iter_mut(i32::MAX - 1, 7, 4);
    let mut steps = 0;
    while h.next_pixel() {
        steps += 1;
    }
    assert_eq!(steps, 1);
    assert!(!h.next_pixel());

    let mut v = dev.vline_iter_mut(-5, i32::MAX - 1, i32::MAX);
    let mut steps = 0;
    while v.next_pixel() {
        steps += 1;
    }
    assert_eq!(steps, 1);
    assert!(!v.next_pixel());
    assert_eq!(dev.tile_count(), 0);
}
