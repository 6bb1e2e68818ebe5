use std::fs;
use std::path::PathBuf;

use screen_grabber::capture::color::encode_srgb;
use screen_grabber::capture::software::{SoftwareCamera, SoftwareTarget, gradient};
use screen_grabber::{
    CaptureError, CaptureRequest, ColorSpace, OutputLayout, RenderCamera, ResolutionTarget,
    capture,
};
use tempfile::tempdir;

const FILE_NAME: &str = "240101_120000.png";

fn request<'a>(group: &'a str, target: &'a ResolutionTarget) -> CaptureRequest<'a> {
    CaptureRequest {
        group,
        target,
        shared_file_name: FILE_NAME,
    }
}

#[test]
fn png_has_requested_dimensions() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default();

    const EDGES: [u32; 4] = [1, 16, 1284, 2778];
    let pairs = EDGES
        .iter()
        .flat_map(|&width| EDGES.iter().map(move |&height| (width, height)));

    for (width, height) in pairs {
        let target = ResolutionTarget::new(format!("{width}x{height}"), width, height);
        let image = capture(&mut camera, &request("sizes", &target), &layout).unwrap();
        assert_eq!((image.width, image.height), (width, height));

        let decoded = image::open(&image.path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (width, height));
    }
}

#[test]
fn iphone_scenario_writes_both_displays() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Assets/Screenshots");
    let layout = OutputLayout::new(&root);
    let mut camera = SoftwareCamera::default();

    let large = ResolutionTarget::new("6.5Display", 1284, 2778);
    let small = ResolutionTarget::new("5.5Display", 1242, 2208);
    let a = capture(&mut camera, &request("iPhone", &large), &layout).unwrap();
    let b = capture(&mut camera, &request("iPhone", &small), &layout).unwrap();

    assert_eq!(a.path, root.join("iPhone/6.5Display/6.5Display240101_120000.png"));
    assert_eq!(b.path, root.join("iPhone/5.5Display/5.5Display240101_120000.png"));
    assert_eq!(image::open(&a.path).unwrap().width(), 1284);
    assert_eq!(image::open(&b.path).unwrap().height(), 2208);
}

fn raw_readback(camera: &mut SoftwareCamera, width: u32, height: u32) -> image::RgbaImage {
    let offscreen = camera.allocate(width, height).unwrap();
    let previous = camera.target();
    camera.set_target(offscreen);
    camera.render().unwrap();
    let frame = camera.read_pixels(&offscreen).unwrap();
    camera.set_target(previous);
    camera.release(offscreen);
    frame
}

#[test]
fn linear_output_is_srgb_encoded() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default()
        .with_color_space(ColorSpace::Linear)
        .with_shader(gradient);

    let mut expected = raw_readback(&mut camera, 64, 32);
    encode_srgb(&mut expected);

    let target = ResolutionTarget::new("linear", 64, 32);
    let image = capture(&mut camera, &request("color", &target), &layout).unwrap();
    let written = image::open(&image.path).unwrap().to_rgba8();
    assert_eq!(written, expected);
}

#[test]
fn gamma_output_is_unchanged_readback() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default().with_shader(gradient);

    let expected = raw_readback(&mut camera, 64, 32);

    let target = ResolutionTarget::new("gamma", 64, 32);
    let image = capture(&mut camera, &request("color", &target), &layout).unwrap();
    let written = image::open(&image.path).unwrap().to_rgba8();
    assert_eq!(written, expected);
}

#[test]
fn mid_grey_is_not_corrected_twice() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let target = ResolutionTarget::new("grey", 2, 2);

    for space in [ColorSpace::Gamma, ColorSpace::Linear] {
        let mut camera = SoftwareCamera::default()
            .with_color_space(space)
            .with_shader(|_, _, _, _| [0.5, 0.5, 0.5, 1.0]);
        let image = capture(&mut camera, &request("grey", &target), &layout).unwrap();
        let written = image::open(&image.path).unwrap().to_rgba8();
        // linear 0.5 is 188 in sRGB either way
        assert_eq!(written.get_pixel(1, 1).0, [188, 188, 188, 255], "{space:?}");
    }
}

#[test]
fn binding_is_restored_after_success() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default();
    let target = ResolutionTarget::new("ok", 8, 8);

    capture(&mut camera, &request("g", &target), &layout).unwrap();
    assert_eq!(camera.target(), SoftwareTarget::Screen);
    assert_eq!(camera.live_buffers(), 0);
}

#[test]
fn binding_is_restored_after_io_failure() {
    let dir = tempdir().unwrap();
    // a file where the group folder should go
    let root = dir.path().join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("blocked"), b"not a directory").unwrap();
    let layout = OutputLayout::new(&root);

    let mut camera = SoftwareCamera::default();
    camera.set_target(SoftwareTarget::Offscreen(999));
    let target = ResolutionTarget::new("label", 8, 8);

    let err = capture(&mut camera, &request("blocked", &target), &layout).unwrap_err();
    assert!(matches!(err, CaptureError::Io { .. }), "{err}");
    assert_eq!(camera.target(), SoftwareTarget::Offscreen(999));
    assert_eq!(camera.live_buffers(), 0);
}

#[test]
fn allocation_failure_writes_nothing() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default().with_max_dimension(1024);
    let target = ResolutionTarget::new("huge", 1284, 2778);

    let err = capture(&mut camera, &request("iPhone", &target), &layout).unwrap_err();
    assert!(matches!(
        err,
        CaptureError::AllocationFailure {
            width: 1284,
            height: 2778,
            ..
        }
    ));
    assert!(!layout.image_path("iPhone", "huge", FILE_NAME).exists());
    assert_eq!(camera.target(), SoftwareTarget::Screen);
}

#[test]
fn unallocatable_frame_is_an_error() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default().with_max_dimension(u32::MAX);
    camera.set_target(SoftwareTarget::Offscreen(7));
    let target = ResolutionTarget::new("vast", 1 << 31, 1 << 30);

    let err = capture(&mut camera, &request("g", &target), &layout).unwrap_err();
    assert!(matches!(err, CaptureError::AllocationFailure { .. }), "{err}");
    assert_eq!(camera.target(), SoftwareTarget::Offscreen(7));
    assert_eq!(camera.live_buffers(), 0);
    assert!(!layout.image_path("g", "vast", FILE_NAME).exists());
}

#[test]
fn missing_camera_is_reported() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let target = ResolutionTarget::new("none", 4, 4);

    let err = capture(&mut None::<SoftwareCamera>, &request("g", &target), &layout).unwrap_err();
    assert!(matches!(err, CaptureError::NoCameraAvailable));
    assert!(!layout.image_path("g", "none", FILE_NAME).exists());
}

#[test]
fn invalid_target_is_reported_before_rendering() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut camera = SoftwareCamera::default();
    let target = ResolutionTarget::new("flat", 0, 10);

    let err = capture(&mut camera, &request("g", &target), &layout).unwrap_err();
    assert!(matches!(err, CaptureError::InvalidTarget { width: 0, .. }));
    assert_eq!(camera.live_buffers(), 0);
}

#[test]
fn existing_file_is_overwritten() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let path: PathBuf = layout.image_path("g", "label", FILE_NAME);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"stale").unwrap();

    let mut camera = SoftwareCamera::default();
    let target = ResolutionTarget::new("label", 3, 5);
    capture(&mut camera, &request("g", &target), &layout).unwrap();

    let decoded = image::open(&path).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (3, 5));
}
