//! Cookie abort must leave a consistent device state and never be counted
//! as an error (§4.11, §8 invariant 6).

use fitzcore::color::Colorspace;
use fitzcore::context::Context;
use fitzcore::cookie::Cookie;
use fitzcore::device::draw::DrawDevice;
use fitzcore::device::{ColorParams, Device};
use fitzcore::geometry::Matrix;
use fitzcore::path::Path;
use fitzcore::pixmap::Pixmap;

#[test]
fn aborting_mid_fill_stops_painting_without_recording_an_error() {
    let ctx = Context::new(None, None, 1 << 20, None);
    let canvas = Pixmap::new(Some(Colorspace::DEVICE_RGB), 50, 50, Default::default(), false);
    let cookie = Cookie::new();
    let mut dev = DrawDevice::new(ctx, canvas).with_cookie(cookie.clone());

    cookie.abort();

    let mut square = Path::new();
    square.rectto(0.0, 0.0, 50.0, 50.0);
    dev.fill_path(&square, false, Matrix::IDENTITY, &Colorspace::DEVICE_RGB, &[1.0, 0.0, 0.0], 1.0, ColorParams::default()).unwrap();

    let out = dev.into_pixmap();
    // the fill was requested after abort, so every scanline is skipped.
    let row = out.row(25);
    assert_eq!(&row[25 * 3..25 * 3 + 3], &[0, 0, 0]);

    assert_eq!(cookie.errors(), 0);
    assert!(cookie.progress() <= cookie.progress_max().max(cookie.progress()));
}

#[test]
fn abort_during_display_list_replay_keeps_clip_stack_balanced() {
    use fitzcore::device::list::{run_display_list, ListRecorder};
    use fitzcore::geometry::Rect;

    let mut rec = ListRecorder::new();
    rec.begin_page(Rect::new(0.0, 0.0, 10.0, 10.0), Matrix::IDENTITY).unwrap();
    let scissor = Rect::new(0.0, 0.0, 10.0, 10.0);
    let mut clip = Path::new();
    clip.rectto(0.0, 0.0, 5.0, 5.0);
    rec.clip_path(&clip, false, Matrix::IDENTITY, scissor).unwrap();
    let mut fill = Path::new();
    fill.rectto(0.0, 0.0, 10.0, 10.0);
    rec.fill_path(&fill, false, Matrix::IDENTITY, &Colorspace::DEVICE_RGB, &[0.0, 1.0, 0.0], 1.0, ColorParams::default()).unwrap();
    rec.pop_clip().unwrap();
    rec.end_page().unwrap();
    let list = rec.into_list();

    struct BalanceTrackingDevice {
        depth: i32,
        max_depth_seen: i32,
    }
    impl Device for BalanceTrackingDevice {
        fn clip_path(&mut self, _: &Path, _: bool, _: Matrix, _: Rect) -> fitzcore::FitzResult<()> {
            self.depth += 1;
            self.max_depth_seen = self.max_depth_seen.max(self.depth);
            Ok(())
        }
        fn pop_clip(&mut self) -> fitzcore::FitzResult<()> {
            self.depth -= 1;
            Ok(())
        }
    }

    let cookie = Cookie::new();
    cookie.abort();
    let mut dev = BalanceTrackingDevice { depth: 0, max_depth_seen: 0 };
    run_display_list(&list, &mut dev, Matrix::IDENTITY, Rect::new(0.0, 0.0, 10.0, 10.0), Some(&cookie)).unwrap();

    assert_eq!(dev.depth, 0, "clip stack must be balanced even when aborted");
    assert_eq!(cookie.errors(), 0);
}
