//! Colorspaces and color conversion (§4.2, §11.3).
//!
//! The four standard spaces are process-wide identity singletons: two
//! `Colorspace` values constructed for the same family always compare equal,
//! mirroring `fz_device_gray(ctx)` et al. returning the same pointer for the
//! lifetime of a context family.

use serde_derive::{Deserialize, Serialize};

#[cfg(feature = "codec-image")]
use image::ColorType as ImageColorType;

/// Abstract converter identity. Indexed colorspaces are represented
/// separately (`Colorspace::Indexed`) since they need a base space plus a
/// lookup table rather than a fixed component count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    DeviceGray,
    DeviceRgb,
    DeviceBgr,
    DeviceCmyk,
}

impl Family {
    #[inline]
    pub fn components(self) -> usize {
        match self {
            Family::DeviceGray => 1,
            Family::DeviceRgb | Family::DeviceBgr => 3,
            Family::DeviceCmyk => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Family::DeviceGray => "DeviceGray",
            Family::DeviceRgb => "DeviceRGB",
            Family::DeviceBgr => "DeviceBGR",
            Family::DeviceCmyk => "DeviceCMYK",
        }
    }
}

/// A colorspace. The four `Family` variants are the process-wide singletons
/// named in §3/§6; `Indexed` wraps a base space with a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub enum Colorspace {
    Device(Family),
    Indexed {
        base: Box<Colorspace>,
        high: u8,
        lookup: Vec<u8>,
    },
}

impl Colorspace {
    pub const DEVICE_GRAY: Colorspace = Colorspace::Device(Family::DeviceGray);
    pub const DEVICE_RGB: Colorspace = Colorspace::Device(Family::DeviceRgb);
    pub const DEVICE_BGR: Colorspace = Colorspace::Device(Family::DeviceBgr);
    pub const DEVICE_CMYK: Colorspace = Colorspace::Device(Family::DeviceCmyk);

    pub fn indexed(base: Colorspace, high: u8, lookup: Vec<u8>) -> Self {
        Colorspace::Indexed {
            base: Box::new(base),
            high,
            lookup,
        }
    }

    /// Number of color components (excludes alpha and separations).
    pub fn n(&self) -> usize {
        match self {
            Colorspace::Device(f) => f.components(),
            Colorspace::Indexed { .. } => 1,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Colorspace::Device(f) => f.name().to_string(),
            Colorspace::Indexed { base, .. } => format!("Indexed({})", base.name()),
        }
    }

    /// Converts a component vector of this colorspace into DeviceRGB.
    /// Indexed spaces are expanded through their lookup table first.
    pub fn to_device_rgb(&self, v: &[f32]) -> [f32; 3] {
        match self {
            Colorspace::Device(Family::DeviceGray) => {
                let g = v.first().copied().unwrap_or(0.0);
                [g, g, g]
            }
            Colorspace::Device(Family::DeviceRgb) => {
                [v.first().copied().unwrap_or(0.0), v.get(1).copied().unwrap_or(0.0), v.get(2).copied().unwrap_or(0.0)]
            }
            Colorspace::Device(Family::DeviceBgr) => {
                [v.get(2).copied().unwrap_or(0.0), v.get(1).copied().unwrap_or(0.0), v.first().copied().unwrap_or(0.0)]
            }
            Colorspace::Device(Family::DeviceCmyk) => {
                let c = v.first().copied().unwrap_or(0.0);
                let m = v.get(1).copied().unwrap_or(0.0);
                let y = v.get(2).copied().unwrap_or(0.0);
                let k = v.get(3).copied().unwrap_or(0.0);
                [
                    1.0 - (c + k).min(1.0),
                    1.0 - (m + k).min(1.0),
                    1.0 - (y + k).min(1.0),
                ]
            }
            Colorspace::Indexed { base, high, lookup } => {
                let idx = (v.first().copied().unwrap_or(0.0).round() as i64)
                    .clamp(0, *high as i64) as usize;
                let n = base.n();
                let start = idx * n;
                let mut comps = [0.0f32; 4];
                for i in 0..n.min(4) {
                    comps[i] = lookup.get(start + i).copied().unwrap_or(0) as f32 / 255.0;
                }
                base.to_device_rgb(&comps[..n])
            }
        }
    }

    /// Converts a DeviceRGB triple into this colorspace's component vector.
    pub fn from_device_rgb(&self, rgb: [f32; 3]) -> Vec<f32> {
        match self {
            Colorspace::Device(Family::DeviceGray) => {
                vec![0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]]
            }
            Colorspace::Device(Family::DeviceRgb) => rgb.to_vec(),
            Colorspace::Device(Family::DeviceBgr) => vec![rgb[2], rgb[1], rgb[0]],
            Colorspace::Device(Family::DeviceCmyk) => {
                let k = 1.0 - rgb[0].max(rgb[1]).max(rgb[2]);
                if (1.0 - k).abs() < f32::EPSILON {
                    vec![0.0, 0.0, 0.0, 1.0]
                } else {
                    vec![
                        (1.0 - rgb[0] - k) / (1.0 - k),
                        (1.0 - rgb[1] - k) / (1.0 - k),
                        (1.0 - rgb[2] - k) / (1.0 - k),
                        k,
                    ]
                }
            }
            Colorspace::Indexed { .. } => {
                // Indexed is not a valid conversion target; callers convert
                // into one of the four device spaces instead.
                rgb.to_vec()
            }
        }
    }
}

/// `convert_color(dst_cs, dst_vec, src_cs, src_vec)`: the only externally
/// visible color-conversion entry point (§4.2). Always routes through
/// DeviceRGB, which is stable/deterministic since both legs are pure
/// functions of their inputs.
pub fn convert_color(dst_cs: &Colorspace, src_cs: &Colorspace, src_vec: &[f32]) -> Vec<f32> {
    if dst_cs == src_cs {
        return src_vec.to_vec();
    }
    let rgb = src_cs.to_device_rgb(src_vec);
    dst_cs.from_device_rgb(rgb)
}

impl PartialEq for Family {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Spot colorant channels beyond a pixmap's base colorspace (§11.3). Each
/// separation carries a name and an equivalent-color function down to
/// DeviceRGB, used only for screen preview compositing.
#[derive(Debug, Clone, Default)]
pub struct Separations {
    names: Vec<String>,
    equivalents: Vec<[f32; 3]>,
}

impl Separations {
    pub fn new() -> Self {
        Separations::default()
    }

    pub fn add(&mut self, name: impl Into<String>, equivalent_rgb: [f32; 3]) {
        self.names.push(name.into());
        self.equivalents.push(equivalent_rgb);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn equivalent_rgb(&self, index: usize) -> Option<[f32; 3]> {
        self.equivalents.get(index).copied()
    }
}

#[cfg(feature = "codec-image")]
pub fn family_from_image_color_type(color_type: ImageColorType) -> Family {
    use ImageColorType::*;
    match color_type {
        L8 | L16 => Family::DeviceGray,
        _ => Family::DeviceRgb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_compare_equal() {
        assert_eq!(Colorspace::DEVICE_RGB, Colorspace::Device(Family::DeviceRgb));
        assert_ne!(Colorspace::DEVICE_RGB, Colorspace::DEVICE_BGR);
    }

    #[test]
    fn gray_round_trips_through_rgb() {
        let gray = Colorspace::DEVICE_GRAY;
        let v = convert_color(&Colorspace::DEVICE_RGB, &gray, &[0.5]);
        assert_eq!(v, vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn cmyk_black_converts_to_zero_rgb() {
        let cmyk = Colorspace::DEVICE_CMYK;
        let rgb = cmyk.to_device_rgb(&[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(rgb, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn bgr_swaps_channel_order() {
        let bgr = Colorspace::DEVICE_BGR;
        assert_eq!(bgr.to_device_rgb(&[0.1, 0.2, 0.3]), [0.3, 0.2, 0.1]);
    }

    #[test]
    fn separations_track_name_and_equivalent() {
        let mut seps = Separations::new();
        seps.add("Spot1", [1.0, 0.0, 0.0]);
        assert_eq!(seps.len(), 1);
        assert_eq!(seps.name(0), Some("Spot1"));
        assert_eq!(seps.equivalent_rgb(0), Some([1.0, 0.0, 0.0]));
    }
}
