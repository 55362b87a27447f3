use std::{collections::BTreeSet, fmt, num::NonZeroU32, str::FromStr};

use pixrefiner_convert::{ConvertOptions, ResizeMode, TargetFormat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{event, Level};

use crate::{AttachmentId, Error, OptionStore, Result};

pub const MAX_WIDTHS_KEY: &str = "webp_max_widths";
pub const MAX_HEIGHTS_KEY: &str = "webp_max_heights";
pub const RESIZE_MODE_KEY: &str = "webp_resize_mode";
pub const QUALITY_KEY: &str = "webp_quality";
pub const BATCH_SIZE_KEY: &str = "webp_batch_size";
pub const PRESERVE_ORIGINALS_KEY: &str = "webp_preserve_originals";
pub const DISABLE_AUTO_CONVERSION_KEY: &str = "webp_disable_auto_conversion";
pub const MIN_SIZE_KB_KEY: &str = "webp_min_size_kb";
pub const USE_AVIF_KEY: &str = "webp_use_avif";
pub const EXCLUDED_IMAGES_KEY: &str = "webp_excluded_images";

pub const DEFAULT_MAX_WIDTHS: &str = "1920,1200,600,300";
pub const DEFAULT_MAX_HEIGHTS: &str = "1080,720,480,360";
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_BATCH_SIZE: u32 = 5;

/// At most this many size variants are produced per upload.
pub const MAX_DIMENSIONS: usize = 4;
pub const MAX_DIMENSION_VALUE: u32 = 9999;
pub const MAX_BATCH_SIZE: u32 = 50;

/// A snapshot of every conversion setting, taken once per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSettings {
    pub max_widths: Vec<NonZeroU32>,
    pub max_heights: Vec<NonZeroU32>,
    pub resize_mode: ResizeMode,
    pub quality: u8,
    pub batch_size: u32,
    pub use_avif: bool,
    pub preserve_originals: bool,
    pub disable_auto_conversion: bool,
    pub min_size_kb: u64,
    pub excluded_images: BTreeSet<AttachmentId>,
}

impl ConversionSettings {
    pub fn target_format(&self) -> TargetFormat {
        if self.use_avif {
            TargetFormat::Avif
        } else {
            TargetFormat::Webp
        }
    }

    /// The size variants to produce, in priority order. The first is the replacement for the
    /// uploaded file.
    pub fn dimensions(&self) -> &[NonZeroU32] {
        match self.resize_mode {
            ResizeMode::Width => &self.max_widths,
            ResizeMode::Height => &self.max_heights,
        }
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            format: self.target_format(),
            quality: self.quality,
            resize_mode: self.resize_mode,
        }
    }

    pub fn min_size_bytes(&self) -> u64 {
        self.min_size_kb.saturating_mul(1024)
    }

    pub fn is_excluded(&self, id: AttachmentId) -> bool {
        self.excluded_images.contains(&id)
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        ConversionSettings {
            max_widths: parse_dimensions(DEFAULT_MAX_WIDTHS),
            max_heights: parse_dimensions(DEFAULT_MAX_HEIGHTS),
            resize_mode: ResizeMode::Width,
            quality: DEFAULT_QUALITY,
            batch_size: DEFAULT_BATCH_SIZE,
            use_avif: false,
            preserve_originals: false,
            disable_auto_conversion: false,
            min_size_kb: 0,
            excluded_images: BTreeSet::new(),
        }
    }
}

/// The individually updatable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingName {
    MaxWidths,
    MaxHeights,
    ResizeMode,
    Quality,
    BatchSize,
    PreserveOriginals,
    DisableAutoConversion,
    MinSizeKb,
    UseAvif,
}

impl SettingName {
    pub const ALL: [SettingName; 9] = [
        SettingName::MaxWidths,
        SettingName::MaxHeights,
        SettingName::ResizeMode,
        SettingName::Quality,
        SettingName::BatchSize,
        SettingName::PreserveOriginals,
        SettingName::DisableAutoConversion,
        SettingName::MinSizeKb,
        SettingName::UseAvif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxWidths => "max_widths",
            Self::MaxHeights => "max_heights",
            Self::ResizeMode => "resize_mode",
            Self::Quality => "quality",
            Self::BatchSize => "batch_size",
            Self::PreserveOriginals => "preserve_originals",
            Self::DisableAutoConversion => "disable_auto_conversion",
            Self::MinSizeKb => "min_size_kb",
            Self::UseAvif => "use_avif",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::MaxWidths => MAX_WIDTHS_KEY,
            Self::MaxHeights => MAX_HEIGHTS_KEY,
            Self::ResizeMode => RESIZE_MODE_KEY,
            Self::Quality => QUALITY_KEY,
            Self::BatchSize => BATCH_SIZE_KEY,
            Self::PreserveOriginals => PRESERVE_ORIGINALS_KEY,
            Self::DisableAutoConversion => DISABLE_AUTO_CONVERSION_KEY,
            Self::MinSizeKb => MIN_SIZE_KB_KEY,
            Self::UseAvif => USE_AVIF_KEY,
        }
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SettingName::ALL
            .into_iter()
            .find(|name| name.as_str() == s || name.key() == s)
            .ok_or_else(|| Error::UnknownSetting(s.to_string()))
    }
}

/// Parse a comma-separated dimension list, dropping anything outside (0, 9999] and keeping
/// the first four.
pub fn parse_dimensions(raw: &str) -> Vec<NonZeroU32> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .filter(|v| *v > 0 && *v <= i64::from(MAX_DIMENSION_VALUE))
        .filter_map(|v| u32::try_from(v).ok().and_then(NonZeroU32::new))
        .take(MAX_DIMENSIONS)
        .collect()
}

fn join_dimensions(dims: &[NonZeroU32]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_as_i64)
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

fn invalid(name: SettingName, reason: impl Into<String>) -> Error {
    let name = name.as_str();
    Error::InvalidValue {
        name,
        reason: reason.into(),
    }
}

/// Typed access to the conversion settings. Reads never fail; missing or malformed values fall
/// back to their defaults.
pub struct Settings<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> Settings<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Settings { store }
    }

    pub fn load(&self) -> ConversionSettings {
        ConversionSettings {
            max_widths: self.max_widths(),
            max_heights: self.max_heights(),
            resize_mode: self.resize_mode(),
            quality: self.quality(),
            batch_size: self.batch_size(),
            use_avif: self.use_avif(),
            preserve_originals: self.preserve_originals(),
            disable_auto_conversion: self.disable_auto_conversion(),
            min_size_kb: self.min_size_kb(),
            excluded_images: self.excluded_images(),
        }
    }

    fn dimensions(&self, key: &str, default: &str) -> Vec<NonZeroU32> {
        let dims = self
            .store
            .get(key)
            .and_then(|v| value_as_string(&v))
            .map(|raw| parse_dimensions(&raw))
            .unwrap_or_default();

        if dims.is_empty() {
            parse_dimensions(default)
        } else {
            dims
        }
    }

    pub fn max_widths(&self) -> Vec<NonZeroU32> {
        self.dimensions(MAX_WIDTHS_KEY, DEFAULT_MAX_WIDTHS)
    }

    pub fn max_heights(&self) -> Vec<NonZeroU32> {
        self.dimensions(MAX_HEIGHTS_KEY, DEFAULT_MAX_HEIGHTS)
    }

    pub fn resize_mode(&self) -> ResizeMode {
        match self.store.get(RESIZE_MODE_KEY) {
            Some(Value::String(s)) if s == "height" => ResizeMode::Height,
            _ => ResizeMode::Width,
        }
    }

    pub fn quality(&self) -> u8 {
        self.store
            .get(QUALITY_KEY)
            .and_then(|v| value_as_i64(&v))
            .map(|q| q.clamp(0, 100) as u8)
            .unwrap_or(DEFAULT_QUALITY)
    }

    pub fn batch_size(&self) -> u32 {
        self.store
            .get(BATCH_SIZE_KEY)
            .and_then(|v| value_as_i64(&v))
            .map(|b| b.clamp(1, i64::from(MAX_BATCH_SIZE)) as u32)
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    fn flag(&self, key: &str) -> bool {
        self.store
            .get(key)
            .and_then(|v| value_as_bool(&v))
            .unwrap_or(false)
    }

    pub fn use_avif(&self) -> bool {
        self.flag(USE_AVIF_KEY)
    }

    pub fn preserve_originals(&self) -> bool {
        self.flag(PRESERVE_ORIGINALS_KEY)
    }

    pub fn disable_auto_conversion(&self) -> bool {
        self.flag(DISABLE_AUTO_CONVERSION_KEY)
    }

    pub fn min_size_kb(&self) -> u64 {
        self.store
            .get(MIN_SIZE_KB_KEY)
            .and_then(|v| value_as_i64(&v))
            .map(|kb| kb.max(0) as u64)
            .unwrap_or(0)
    }

    pub fn excluded_images(&self) -> BTreeSet<AttachmentId> {
        match self.store.get(EXCLUDED_IMAGES_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(value_as_i64)
                .filter_map(|id| u64::try_from(id).ok())
                .map(AttachmentId)
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    fn set_dimensions(&self, name: SettingName, raw: &str) -> Result<()> {
        let dims = parse_dimensions(raw);
        if dims.is_empty() {
            return Err(invalid(
                name,
                format!("expected comma-separated values between 1 and {MAX_DIMENSION_VALUE}"),
            ));
        }

        self.store.set(name.key(), json!(join_dimensions(&dims)))
    }

    pub fn set_max_widths(&self, raw: &str) -> Result<()> {
        self.set_dimensions(SettingName::MaxWidths, raw)
    }

    pub fn set_max_heights(&self, raw: &str) -> Result<()> {
        self.set_dimensions(SettingName::MaxHeights, raw)
    }

    pub fn set_resize_mode(&self, mode: ResizeMode) -> Result<()> {
        self.store.set(RESIZE_MODE_KEY, json!(mode.as_str()))
    }

    pub fn set_quality(&self, quality: i64) -> Result<()> {
        if !(0..=100).contains(&quality) {
            return Err(invalid(SettingName::Quality, "must be between 0 and 100"));
        }
        self.store.set(QUALITY_KEY, json!(quality))
    }

    pub fn set_batch_size(&self, batch_size: i64) -> Result<()> {
        if !(1..=i64::from(MAX_BATCH_SIZE)).contains(&batch_size) {
            return Err(invalid(
                SettingName::BatchSize,
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }
        self.store.set(BATCH_SIZE_KEY, json!(batch_size))
    }

    pub fn set_min_size_kb(&self, min_size_kb: i64) -> Result<()> {
        if min_size_kb < 0 {
            return Err(invalid(SettingName::MinSizeKb, "must not be negative"));
        }
        self.store.set(MIN_SIZE_KB_KEY, json!(min_size_kb))
    }

    pub fn set_flag(&self, name: SettingName, value: bool) -> Result<()> {
        match name {
            SettingName::UseAvif
            | SettingName::PreserveOriginals
            | SettingName::DisableAutoConversion => self.store.set(name.key(), json!(value)),
            _ => Err(invalid(name, "not a boolean setting")),
        }
    }

    /// Update one setting from an untyped value, as posted by the admin surface.
    pub fn set_from_value(&self, name: SettingName, value: &Value) -> Result<()> {
        let result = match name {
            SettingName::MaxWidths | SettingName::MaxHeights => {
                let raw = value_as_string(value)
                    .ok_or_else(|| invalid(name, "expected a comma-separated list"))?;
                self.set_dimensions(name, &raw)
            }
            SettingName::ResizeMode => match value.as_str() {
                Some("width") => self.set_resize_mode(ResizeMode::Width),
                Some("height") => self.set_resize_mode(ResizeMode::Height),
                _ => Err(invalid(name, "expected \"width\" or \"height\"")),
            },
            SettingName::Quality | SettingName::BatchSize | SettingName::MinSizeKb => {
                let number = value_as_i64(value).ok_or_else(|| invalid(name, "expected a number"))?;
                match name {
                    SettingName::Quality => self.set_quality(number),
                    SettingName::BatchSize => self.set_batch_size(number),
                    _ => self.set_min_size_kb(number),
                }
            }
            SettingName::PreserveOriginals
            | SettingName::DisableAutoConversion
            | SettingName::UseAvif => {
                let flag = value_as_bool(value).ok_or_else(|| invalid(name, "expected a boolean"))?;
                self.set_flag(name, flag)
            }
        };

        if result.is_ok() {
            event!(Level::INFO, setting = %name, %value, "Updated setting");
        }
        result
    }

    /// Add an attachment to the exclusion list. Returns false if it was already there.
    pub fn exclude(&self, id: AttachmentId) -> Result<bool> {
        let mut excluded = self.excluded_images();
        if !excluded.insert(id) {
            return Ok(false);
        }
        self.save_excluded(&excluded)?;
        Ok(true)
    }

    /// Remove an attachment from the exclusion list. Returns false if it wasn't there.
    pub fn include(&self, id: AttachmentId) -> Result<bool> {
        let mut excluded = self.excluded_images();
        if !excluded.remove(&id) {
            return Ok(false);
        }
        self.save_excluded(&excluded)?;
        Ok(true)
    }

    fn save_excluded(&self, excluded: &BTreeSet<AttachmentId>) -> Result<()> {
        let ids = excluded.iter().map(|id| id.0).collect::<Vec<_>>();
        self.store.set(EXCLUDED_IMAGES_KEY, json!(ids))
    }

    /// Restore every setting to its default. The exclusion list and the log are kept.
    pub fn reset_defaults(&self) -> Result<()> {
        for name in SettingName::ALL {
            self.store.delete(name.key())?;
        }
        event!(Level::INFO, "Settings reset to defaults");
        Ok(())
    }
}
