use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::model::{
    DifficultyTier, ImageRef, ObjectRecord, RealmTheme, Sections, SpecialCaseOverride,
    default_old_image_file_name,
};

pub const DIFFICULTIES_FILENAME: &str = "difficulties.json";
pub const REALMS_FILENAME: &str = "realms.json";
pub const SPECIAL_CASES_FILENAME: &str = "special_cases.json";
pub const OBJECTS_DIRNAME: &str = "objects";

pub const UNKNOWN_TIER_NAME: &str = "Unknown";
pub const UNKNOWN_TIER_ICON: &str = "Missing_PNG";
pub const UNKNOWN_TIER_COLOR: &str = "#ffffff";
pub const DEFAULT_GRADIENT: &str = "-webkit-linear-gradient(#ffffff,#ffffff)";
pub const DEFAULT_ACCENT: &str = "#ffffff";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealmThemeEntry {
    pub label: String,
    pub image: String,
    pub gradient: String,
    pub accent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubrealmEntry {
    pub label: String,
    pub parent: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub gradient: Option<String>,
    #[serde(default)]
    pub accent: Option<String>,
}

/// Reference tables behind every lookup. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct ThemeTables {
    pub difficulties: Vec<DifficultyTier>,
    pub realms: Vec<RealmThemeEntry>,
    pub subrealms: Vec<SubrealmEntry>,
    pub special_cases: BTreeMap<String, SpecialCaseOverride>,
}

/// Pure lookups from difficulty and realm labels to display attributes.
/// Unknown names resolve to defaults instead of failing.
#[derive(Debug, Clone, Default)]
pub struct MetadataResolver {
    tiers: BTreeMap<String, DifficultyTier>,
    realms: BTreeMap<String, RealmThemeEntry>,
    subrealms: BTreeMap<String, SubrealmEntry>,
    special_cases: BTreeMap<String, SpecialCaseOverride>,
}

impl MetadataResolver {
    pub fn new(tables: ThemeTables) -> Self {
        let mut tiers = BTreeMap::new();
        for tier in tables.difficulties {
            let key = tier.name.trim().to_lowercase();
            if tiers.contains_key(&key) {
                warn!(tier = %tier.name, "duplicate difficulty tier ignored");
                continue;
            }
            tiers.insert(key, tier);
        }

        let mut realms = BTreeMap::new();
        for realm in tables.realms {
            if realms.contains_key(&realm.label) {
                warn!(realm = %realm.label, "duplicate realm theme ignored");
                continue;
            }
            realms.insert(realm.label.clone(), realm);
        }

        let mut subrealms = BTreeMap::new();
        for subrealm in tables.subrealms {
            if subrealms.contains_key(&subrealm.label) {
                warn!(subrealm = %subrealm.label, "duplicate subrealm theme ignored");
                continue;
            }
            subrealms.insert(subrealm.label.clone(), subrealm);
        }

        Self {
            tiers,
            realms,
            subrealms,
            special_cases: tables.special_cases,
        }
    }

    /// Case-insensitive on the tier name. Unknown names keep their own label
    /// with priority 0 so categories still read sensibly.
    pub fn resolve_difficulty(&self, name: &str) -> DifficultyTier {
        let key = name.trim().to_lowercase();
        if let Some(tier) = self.tiers.get(&key) {
            return tier.clone();
        }
        DifficultyTier {
            name: fallback_tier_name(name),
            icon_ref: UNKNOWN_TIER_ICON.to_string(),
            color_hex: UNKNOWN_TIER_COLOR.to_string(),
            priority: 0,
        }
    }

    /// Exact, case-sensitive label. Subrealms take each missing field from
    /// their parent realm.
    pub fn resolve_realm_theme(&self, label: &str) -> RealmTheme {
        let special_case = self.resolve_special_case(label);
        if let Some(realm) = self.realms.get(label) {
            return RealmTheme {
                realm_name: label.to_string(),
                background_image_ref: realm.image.clone(),
                gradient_spec: realm.gradient.clone(),
                accent_color: realm.accent.clone(),
                special_case,
            };
        }

        if let Some(subrealm) = self.subrealms.get(label) {
            let parent = self.realms.get(&subrealm.parent);
            if parent.is_none() {
                debug!(subrealm = %label, parent = %subrealm.parent, "subrealm parent has no theme");
            }
            let default_background = default_background(label);
            return RealmTheme {
                realm_name: label.to_string(),
                background_image_ref: subrealm
                    .image
                    .clone()
                    .or_else(|| parent.map(|realm| realm.image.clone()))
                    .unwrap_or(default_background),
                gradient_spec: subrealm
                    .gradient
                    .clone()
                    .or_else(|| parent.map(|realm| realm.gradient.clone()))
                    .unwrap_or_else(|| DEFAULT_GRADIENT.to_string()),
                accent_color: subrealm
                    .accent
                    .clone()
                    .or_else(|| parent.map(|realm| realm.accent.clone()))
                    .unwrap_or_else(|| DEFAULT_ACCENT.to_string()),
                special_case,
            };
        }

        RealmTheme {
            realm_name: label.to_string(),
            background_image_ref: default_background(label),
            gradient_spec: DEFAULT_GRADIENT.to_string(),
            accent_color: DEFAULT_ACCENT.to_string(),
            special_case,
        }
    }

    pub fn resolve_special_case(&self, label: &str) -> Option<SpecialCaseOverride> {
        self.special_cases.get(label).cloned()
    }

    pub fn parent_realm(&self, label: &str) -> Option<&str> {
        self.subrealms
            .get(label)
            .map(|subrealm| subrealm.parent.as_str())
    }

    pub fn realm_labels(&self) -> Vec<&str> {
        self.realms.keys().map(String::as_str).collect()
    }

    pub fn subrealm_labels(&self) -> Vec<(&str, &str)> {
        self.subrealms
            .values()
            .map(|subrealm| (subrealm.label.as_str(), subrealm.parent.as_str()))
            .collect()
    }
}

fn fallback_tier_name(name: &str) -> String {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => UNKNOWN_TIER_NAME.to_string(),
    }
}

fn default_background(label: &str) -> String {
    format!("{label} Sky.webp")
}

/// Records plus reference tables, as read from a metadata directory.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    pub root: PathBuf,
    pub tables: ThemeTables,
    pub records: Vec<ObjectRecord>,
}

impl MetadataStore {
    pub fn resolver(&self) -> MetadataResolver {
        MetadataResolver::new(self.tables.clone())
    }

    pub fn records_in_realm(&self, realm: &str) -> Vec<&ObjectRecord> {
        self.records
            .iter()
            .filter(|record| record.realm_name == realm)
            .collect()
    }

    pub fn find_record(&self, name: &str, realm: Option<&str>) -> Option<&ObjectRecord> {
        let wanted = crate::title::title_key(name);
        self.records.iter().find(|record| {
            crate::title::title_key(&record.name) == wanted
                && realm.is_none_or(|realm| record.realm_name == realm)
        })
    }

    pub fn realm_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.realm_name.clone()).or_insert(0) += 1;
        }
        counts
    }
}

pub fn load_metadata(root: &Path) -> Result<MetadataStore> {
    let difficulties: DifficultiesFile =
        read_optional_json(&root.join(DIFFICULTIES_FILENAME))?.unwrap_or_default();
    let realms: RealmsFile = read_optional_json(&root.join(REALMS_FILENAME))?.unwrap_or_default();
    let special_cases: SpecialCasesFile =
        read_optional_json(&root.join(SPECIAL_CASES_FILENAME))?.unwrap_or_default();
    let records = load_object_records(&root.join(OBJECTS_DIRNAME))?;

    debug!(
        tiers = difficulties.difficulties.len(),
        realms = realms.realms.len(),
        subrealms = realms.subrealms.len(),
        records = records.len(),
        "loaded metadata"
    );

    Ok(MetadataStore {
        root: root.to_path_buf(),
        tables: ThemeTables {
            difficulties: difficulties.difficulties,
            realms: realms.realms,
            subrealms: realms.subrealms,
            special_cases: special_cases.special_cases,
        },
        records,
    })
}

fn load_object_records(objects_dir: &Path) -> Result<Vec<ObjectRecord>> {
    let mut records = Vec::new();
    if !objects_dir.exists() {
        return Ok(records);
    }

    for entry in WalkDir::new(objects_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("failed to walk {}", objects_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let file: ObjectFile = read_json(path)?;
        for raw in file.objects {
            records.push(raw.into_record(&file.realm));
        }
    }
    Ok(records)
}

fn read_optional_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Debug, Deserialize, Default)]
struct DifficultiesFile {
    #[serde(default)]
    difficulties: Vec<DifficultyTier>,
}

#[derive(Debug, Deserialize, Default)]
struct RealmsFile {
    #[serde(default)]
    realms: Vec<RealmThemeEntry>,
    #[serde(default)]
    subrealms: Vec<SubrealmEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct SpecialCasesFile {
    #[serde(default)]
    special_cases: BTreeMap<String, SpecialCaseOverride>,
}

#[derive(Debug, Deserialize)]
struct ObjectFile {
    realm: String,
    #[serde(default)]
    objects: Vec<RawObject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOldImage {
    Flag(bool),
    File(String),
}

#[derive(Debug, Deserialize)]
struct RawImage {
    file: String,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    #[serde(alias = "ObjectName")]
    name: String,
    #[serde(default, alias = "Difficulty")]
    difficulty: String,
    #[serde(default, alias = "Description", alias = "hint")]
    description: String,
    #[serde(default, alias = "Area", alias = "Section", alias = "Level")]
    area: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    images: Vec<RawImage>,
    #[serde(default)]
    old_image: Option<RawOldImage>,
    #[serde(default)]
    previous_difficulties: Vec<String>,
    #[serde(default)]
    info: String,
    #[serde(default)]
    obtaining: String,
    #[serde(default)]
    categories: Vec<String>,
}

impl RawObject {
    fn into_record(self, realm: &str) -> ObjectRecord {
        let mut images = Vec::new();
        if let Some(image) = self.image.filter(|image| !image.trim().is_empty()) {
            images.push(ImageRef::new(image));
        }
        for image in self.images {
            images.push(ImageRef {
                file_name: image.file,
                caption: image.caption,
            });
        }

        let old_image = match self.old_image {
            Some(RawOldImage::Flag(true)) => Some(default_old_image_file_name(&self.name)),
            Some(RawOldImage::File(file)) if !file.trim().is_empty() => Some(file),
            _ => None,
        };

        let mut record = ObjectRecord {
            name: self.name.trim().to_string(),
            difficulty: self.difficulty.trim().to_string(),
            realm_name: realm.to_string(),
            description: self.description.trim().to_string(),
            area: self.area.filter(|area| {
                let area = area.trim();
                !area.is_empty() && !area.eq_ignore_ascii_case("unknown")
            }),
            images,
            old_image,
            previous_difficulties: self.previous_difficulties,
            sections: Sections::new(self.info.trim(), self.obtaining.trim()),
            extra_categories: self.categories,
        };
        record.apply_image_default();
        record
    }
}
