use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, imageops::FilterType};
use nalgebra::{Matrix4, Perspective3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{mesh::Aabb, settings::StressSettings};

/// Horizontal field of view of a 50 mm lens on a 36 mm sensor.
const HORIZONTAL_FOV_DEGREES: f32 = 39.6;
const CAMERA_DISTANCE_FACTOR: f32 = 2.5;
const CAMERA_RAISE_FACTOR: f32 = 0.3;
const QUARTER_OFFSET: f32 = 0.7;
/// Sun position; light arrives from this direction.
const LIGHT_POSITION: [f32; 3] = [5.0, -5.0, 10.0];

const BACKGROUND: Rgb<u8> = Rgb([46, 48, 56]);
const SURFACE: [f32; 3] = [205.0, 200.0, 190.0];
const FLAG_FRAME: Rgb<u8> = Rgb([220, 30, 30]);
const AMBIENT: f32 = 0.25;

pub const DEFAULT_DEVICE_PREFERENCE: [RenderDevice; 5] = [
    RenderDevice::Optix,
    RenderDevice::Cuda,
    RenderDevice::Hip,
    RenderDevice::Metal,
    RenderDevice::Cpu,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraAngle {
    Front,
    Quarter,
}

impl CameraAngle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraAngle::Front => "front",
            CameraAngle::Quarter => "quarter",
        }
    }
}

/// Render backends in the order they are usually preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RenderDevice {
    Optix,
    Cuda,
    Hip,
    Metal,
    Cpu,
}

impl RenderDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderDevice::Optix => "OPTIX",
            RenderDevice::Cuda => "CUDA",
            RenderDevice::Hip => "HIP",
            RenderDevice::Metal => "METAL",
            RenderDevice::Cpu => "CPU",
        }
    }

    /// Only the built-in software rasterizer is compiled in.
    pub fn is_available(&self) -> bool {
        matches!(self, RenderDevice::Cpu)
    }
}

/// Interpolation used when downsampling supersampled frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeInterpolation {
    Nearest,
    /// `image`'s `Triangle` filter.
    #[default]
    Bilinear,
    /// `image`'s `CatmullRom` filter.
    Bicubic,
    Gaussian,
    Lanczos3,
}

impl From<ResizeInterpolation> for FilterType {
    fn from(value: ResizeInterpolation) -> Self {
        match value {
            ResizeInterpolation::Nearest => FilterType::Nearest,
            ResizeInterpolation::Bilinear => FilterType::Triangle,
            ResizeInterpolation::Bicubic => FilterType::CatmullRom,
            ResizeInterpolation::Gaussian => FilterType::Gaussian,
            ResizeInterpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no render backend available (tried {0:?})")]
    NoBackend(Vec<RenderDevice>),

    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("nothing to frame: the rest mesh has no bounds")]
    NoFraming,

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// First available backend in `preference`. Unavailable ones are logged and skipped.
pub fn select_device(preference: &[RenderDevice]) -> Result<RenderDevice, RenderError> {
    for device in preference {
        if device.is_available() {
            debug!(device = device.as_str(), "render backend selected");
            return Ok(*device);
        }
        warn!(device = device.as_str(), "render backend unavailable; trying next");
    }
    Err(RenderError::NoBackend(preference.to_vec()))
}

/// Pinhole camera looking at a target, Z up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub fov_y: f32,
    pub aspect: f32,
}

impl Camera {
    /// Frame `bounds` from `angle`: back off 2.5 × the largest extent and
    /// raise by 0.3 × it.
    pub fn framing(bounds: &Aabb, angle: CameraAngle, aspect: f32) -> Self {
        let center = bounds.center();
        let size = bounds.longest_extent().max(1e-3);
        let distance = size * CAMERA_DISTANCE_FACTOR;
        let raise = size * CAMERA_RAISE_FACTOR;
        let eye = match angle {
            CameraAngle::Front => Vector3::new(center.x, center.y - distance, center.z + raise),
            CameraAngle::Quarter => Vector3::new(
                center.x + distance * QUARTER_OFFSET,
                center.y - distance * QUARTER_OFFSET,
                center.z + raise,
            ),
        };
        let half_horizontal = (HORIZONTAL_FOV_DEGREES.to_radians() * 0.5).tan();
        // The wider image axis carries the lens field of view.
        let fov_y = if aspect >= 1.0 {
            2.0 * (half_horizontal / aspect).atan()
        } else {
            2.0 * half_horizontal.atan()
        };
        Self {
            eye: Point3::from(eye),
            target: Point3::from(center),
            fov_y,
            aspect,
        }
    }

    pub fn view_projection(&self, near: f32, far: f32) -> Matrix4<f32> {
        let view = Matrix4::look_at_rh(&self.eye, &self.target, &Vector3::z());
        let projection = Perspective3::new(self.aspect, self.fov_y, near, far);
        projection.to_homogeneous() * view
    }
}

/// Software z-buffer rasterizer with two-sided Lambert shading.
#[derive(Debug, Clone)]
pub struct Renderer {
    device: RenderDevice,
    width: u32,
    height: u32,
    supersample: u32,
    resize: ResizeInterpolation,
    angles: Vec<CameraAngle>,
}

impl Renderer {
    pub fn new(settings: &StressSettings) -> Result<Self, RenderError> {
        if settings.width == 0 || settings.height == 0 {
            return Err(RenderError::InvalidSize {
                width: settings.width,
                height: settings.height,
            });
        }
        let device = select_device(&settings.device_preference)?;
        Ok(Self {
            device,
            width: settings.width,
            height: settings.height,
            supersample: settings.supersample.clamp(1, 4),
            resize: settings.resize,
            angles: settings.angles.clone(),
        })
    }

    pub fn device(&self) -> RenderDevice {
        self.device
    }

    pub fn angles(&self) -> &[CameraAngle] {
        &self.angles
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Shade one view at output resolution. A flagged frame gets a red border.
    pub fn render(&self, positions: &[Vector3<f32>], faces: &[[u32; 3]], camera: &Camera, flagged: bool) -> RgbImage {
        let (width, height) = (self.width * self.supersample, self.height * self.supersample);
        let frame = rasterize(positions, faces, camera, width, height);
        let mut image = if self.supersample > 1 {
            image::imageops::resize(&frame, self.width, self.height, self.resize.into())
        } else {
            frame
        };
        if flagged {
            draw_frame(&mut image, FLAG_FRAME);
        }
        image
    }

    /// Render every configured angle to `{pose}_{angle}.png` in `output_dir`.
    pub fn render_views(
        &self,
        output_dir: &Path,
        pose_name: &str,
        positions: &[Vector3<f32>],
        faces: &[[u32; 3]],
        framing: &Aabb,
        flagged: bool,
    ) -> Result<Vec<PathBuf>, RenderError> {
        let mut paths = Vec::with_capacity(self.angles.len());
        for angle in &self.angles {
            let camera = Camera::framing(framing, *angle, self.aspect());
            let image = self.render(positions, faces, &camera, flagged);
            let path = output_dir.join(format!("{pose_name}_{}.png", angle.as_str()));
            image
                .save(&path)
                .map_err(|source| RenderError::Write { path: path.clone(), source })?;
            debug!(path = %path.display(), "rendered");
            paths.push(path);
        }
        Ok(paths)
    }
}

fn rasterize(positions: &[Vector3<f32>], faces: &[[u32; 3]], camera: &Camera, width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    let distance = (camera.eye - camera.target).norm().max(1e-3);
    let near = distance * 0.01;
    let far = distance * 10.0;
    let view_projection = camera.view_projection(near, far);
    let light = Vector3::from(LIGHT_POSITION).normalize();

    // Screen x, screen y, ndc depth; None behind the camera.
    let projected: Vec<Option<Vector3<f32>>> = positions
        .iter()
        .map(|position| {
            if !position.iter().all(|value| value.is_finite()) {
                return None;
            }
            let clip = view_projection * position.push(1.0);
            if clip.w <= near * 1e-3 {
                return None;
            }
            let ndc = clip.xyz() / clip.w;
            Some(Vector3::new(
                (ndc.x + 1.0) * 0.5 * width as f32,
                (1.0 - ndc.y) * 0.5 * height as f32,
                ndc.z,
            ))
        })
        .collect();

    let mut depth = vec![f32::INFINITY; (width * height) as usize];
    for face in faces {
        let Some(corners) = face
            .iter()
            .map(|index| projected.get(*index as usize).copied().flatten())
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let [a, b, c] = [corners[0], corners[1], corners[2]];
        let area = edge(&a, &b, &c);
        if area.abs() < 1e-12 {
            continue;
        }

        let normal = {
            let [p0, p1, p2] = [face[0], face[1], face[2]].map(|index| positions[index as usize]);
            (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-12).unwrap_or_else(Vector3::z)
        };
        let intensity = AMBIENT + (1.0 - AMBIENT) * normal.dot(&light).abs();
        let color = Rgb(SURFACE.map(|channel| (channel * intensity).clamp(0.0, 255.0) as u8));

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
        let max_x = (a.x.max(b.x).max(c.x).ceil().min(width as f32 - 1.0)).max(0.0) as u32;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
        let max_y = (a.y.max(b.y).max(c.y).ceil().min(height as f32 - 1.0)).max(0.0) as u32;
        if min_x > max_x || min_y > max_y {
            continue;
        }
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let pixel = Vector3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
                let w0 = edge(&b, &c, &pixel) / area;
                let w1 = edge(&c, &a, &pixel) / area;
                let w2 = edge(&a, &b, &pixel) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                if !(-1.0..=1.0).contains(&z) {
                    continue;
                }
                let slot = (y * width + x) as usize;
                if z < depth[slot] {
                    depth[slot] = z;
                    image.put_pixel(x, y, color);
                }
            }
        }
    }
    image
}

/// Twice the signed area of `a`, `b`, `p` in screen space.
fn edge(a: &Vector3<f32>, b: &Vector3<f32>, p: &Vector3<f32>) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn draw_frame(image: &mut RgbImage, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let thickness = (width.min(height) / 80).max(2);
    for y in 0..height {
        for x in 0..width {
            if x < thickness || y < thickness || x + thickness >= width || y + thickness >= height {
                image.put_pixel(x, y, color);
            }
        }
    }
}
