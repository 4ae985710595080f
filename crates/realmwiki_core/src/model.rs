use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_EXTENSION: &str = ".png";
pub const OLD_IMAGE_CAPTION: &str = "Old";
pub const CURRENT_IMAGE_CAPTION: &str = "Current";

/// Human-authored prose recovered from, or destined for, a wiki page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sections {
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub obtaining: String,
}

impl Sections {
    pub fn new(info: impl Into<String>, obtaining: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            obtaining: obtaining.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.info.trim().is_empty() && self.obtaining.trim().is_empty()
    }

    /// Either body is blank, so a human still has to write something.
    pub fn needs_manual_content(&self) -> bool {
        self.info.trim().is_empty() || self.obtaining.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub file_name: String,
    pub caption: Option<String>,
}

impl ImageRef {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            caption: None,
        }
    }

    pub fn with_caption(file_name: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            caption: Some(caption.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub name: String,
    pub difficulty: String,
    pub realm_name: String,
    pub description: String,
    /// Section/level label inside the realm; the infobox links here when set.
    pub area: Option<String>,
    pub images: Vec<ImageRef>,
    pub old_image: Option<String>,
    /// Most recent first.
    pub previous_difficulties: Vec<String>,
    pub sections: Sections,
    pub extra_categories: Vec<String>,
}

impl ObjectRecord {
    pub fn new(
        name: impl Into<String>,
        difficulty: impl Into<String>,
        realm_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            difficulty: difficulty.into(),
            realm_name: realm_name.into(),
            ..Self::default()
        }
    }

    pub fn has_old_image(&self) -> bool {
        self.old_image.is_some()
    }

    /// Applies the `<name>.png` image default. Called once when a record is
    /// built, so the generator never has to guess a filename.
    pub fn apply_image_default(&mut self) {
        if self.images.is_empty() && !self.name.trim().is_empty() {
            self.images.push(ImageRef::new(default_image_file_name(&self.name)));
        }
    }

    pub fn area_label(&self) -> &str {
        match self.area.as_deref() {
            Some(area) if !area.trim().is_empty() => area,
            _ => &self.realm_name,
        }
    }
}

pub fn default_image_file_name(name: &str) -> String {
    format!("{}{DEFAULT_IMAGE_EXTENSION}", name.trim())
}

pub fn default_old_image_file_name(name: &str) -> String {
    format!("{} {OLD_IMAGE_CAPTION}{DEFAULT_IMAGE_EXTENSION}", name.trim())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyTier {
    pub name: String,
    #[serde(rename = "icon")]
    pub icon_ref: String,
    #[serde(rename = "hex")]
    pub color_hex: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialCaseOverride {
    #[serde(default)]
    pub custom_gradient: Option<String>,
    #[serde(default)]
    pub custom_background: Option<String>,
    #[serde(default)]
    pub static_overlay_image: Option<String>,
    #[serde(default)]
    pub static_overlay_opacity: Option<f32>,
    #[serde(default)]
    pub monochrome: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealmTheme {
    pub realm_name: String,
    pub background_image_ref: String,
    pub gradient_spec: String,
    pub accent_color: String,
    pub special_case: Option<SpecialCaseOverride>,
}
