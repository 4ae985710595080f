use crate::error::RecordError;
use crate::metadata::MetadataResolver;
use crate::model::{
    CURRENT_IMAGE_CAPTION, DifficultyTier, ImageRef, OLD_IMAGE_CAPTION, ObjectRecord, RealmTheme,
    SpecialCaseOverride,
};

pub const DEFAULT_COLLAPSIBLE_THRESHOLD: i32 = 11;
pub const DEFAULT_OVERLAY_OPACITY: f32 = 0.3;
pub const INFOBOX_TEMPLATE: &str = "CharacterInfo";
pub const INFO_HEADER: &str = "== Info ==";
pub const OBTAINING_HEADER: &str = "== Obtaining ==";
pub const SPOILER_WARNING: &str = "'''''The following text will show instructions on how to get this object. If you wish to find it by yourself, avoid opening the text.'''''";
pub const SPOILER_OPEN: &str = "<div class=\"mw-collapsible mw-collapsed\" style=\"width:100%\">";
pub const SPOILER_CONTENT_OPEN: &str = "<div class=\"mw-collapsible-content\">";
pub const OBJECTS_CATEGORY: &str = "Objects";

const BACKGROUND_OPEN: &str =
    "<div align=\"center\" style=\"position:fixed; z-index:-1; top:0; left:0; right:0; bottom:0;\">";
const BACKGROUND_SIZE: &str = "2000px";
const CONTENT_OPEN: &str = "<div style=\"position:relative; z-index:1;\">";
const MONOCHROME_OVERLAY: &str = "<div style=\"position:fixed; top:0; left:0; right:0; bottom:0; z-index:4; pointer-events:none; background:#000; mix-blend-mode:saturation;\"></div>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Tiers at or above this priority get the spoiler wrapper.
    pub collapsible_threshold: i32,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            collapsible_threshold: DEFAULT_COLLAPSIBLE_THRESHOLD,
        }
    }
}

/// Everything the template needs besides the record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub tier: DifficultyTier,
    pub previous_tiers: Vec<DifficultyTier>,
    pub theme: RealmTheme,
    pub special_case: Option<SpecialCaseOverride>,
}

impl ResolvedMetadata {
    pub fn resolve(resolver: &MetadataResolver, record: &ObjectRecord) -> Self {
        let theme = resolver.resolve_realm_theme(&record.realm_name);
        Self {
            tier: resolver.resolve_difficulty(&record.difficulty),
            previous_tiers: record
                .previous_difficulties
                .iter()
                .map(|name| resolver.resolve_difficulty(name))
                .collect(),
            special_case: theme.special_case.clone(),
            theme,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupGenerator {
    options: GeneratorOptions,
}

impl MarkupGenerator {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> GeneratorOptions {
        self.options
    }

    pub fn is_collapsible(&self, tier: &DifficultyTier) -> bool {
        tier.priority >= self.options.collapsible_threshold
    }

    /// Renders the canonical page. Only an empty object name is rejected;
    /// every other missing field renders as an empty value.
    pub fn generate(
        &self,
        record: &ObjectRecord,
        resolved: &ResolvedMetadata,
    ) -> Result<String, RecordError> {
        let name = record.name.trim();
        if name.is_empty() {
            return Err(RecordError::EmptyName);
        }
        let theme = &resolved.theme;
        let special = resolved.special_case.as_ref();

        let mut out = String::new();

        let background = special
            .and_then(|special| special.custom_background.as_deref())
            .unwrap_or(&theme.background_image_ref);
        out.push_str(BACKGROUND_OPEN);
        out.push('\n');
        out.push_str(&format!("[[File:{background}|{BACKGROUND_SIZE}]]\n"));
        out.push_str("</div>\n");
        if let Some(special) = special {
            push_overlays(&mut out, special);
        }

        let gradient = special
            .and_then(|special| special.custom_gradient.as_deref())
            .unwrap_or(&theme.gradient_spec);
        out.push_str(&format!(
            "<div style=\"--theme-accent-color:{gradient}; --theme-accent-label-color:{};\">\n",
            theme.accent_color
        ));
        out.push_str(CONTENT_OPEN);
        out.push_str("\n\n");

        out.push_str(&format!("{{{{{INFOBOX_TEMPLATE}\n"));
        out.push_str(&format!("|name={name}\n"));
        out.push_str(&format!("|character={}\n", render_gallery(record)));
        out.push_str(&format!("|difficulty={}\n", tier_badge(&resolved.tier)));
        out.push_str(&format!("|area=[[{}]]\n", record.area_label()));
        out.push_str(&format!("|hint={}\n", single_line(&record.description)));
        if !resolved.previous_tiers.is_empty() {
            let badges = resolved
                .previous_tiers
                .iter()
                .map(tier_badge)
                .collect::<Vec<_>>()
                .join("<br>\n");
            out.push_str(&format!("|previousdifficulties=\n{badges}\n"));
        }
        out.push_str("}}\n\n");

        out.push_str(INFO_HEADER);
        out.push('\n');
        out.push_str(record.sections.info.trim());
        out.push_str("\n\n");

        out.push_str(OBTAINING_HEADER);
        out.push('\n');
        let obtaining = record.sections.obtaining.trim();
        if self.is_collapsible(&resolved.tier) {
            out.push_str(SPOILER_WARNING);
            out.push('\n');
            out.push_str(SPOILER_OPEN);
            out.push('\n');
            out.push_str(SPOILER_CONTENT_OPEN);
            out.push('\n');
            out.push_str(obtaining);
            out.push_str("\n</div>\n</div>");
        } else {
            out.push_str(obtaining);
        }
        out.push_str("\n\n");

        for category in page_categories(record, &resolved.tier) {
            out.push_str(&format!("[[Category:{category}]]\n"));
        }

        out.push_str("</div>\n</div>");
        Ok(out)
    }
}

/// Convenience entry point with the default threshold.
pub fn generate(record: &ObjectRecord, resolved: &ResolvedMetadata) -> Result<String, RecordError> {
    MarkupGenerator::default().generate(record, resolved)
}

/// The three fixed categories, then caller extras in order, without repeats.
pub fn page_categories(record: &ObjectRecord, tier: &DifficultyTier) -> Vec<String> {
    let mut categories = vec![
        format!("{} {OBJECTS_CATEGORY}", tier.name),
        OBJECTS_CATEGORY.to_string(),
        format!("{} {OBJECTS_CATEGORY}", record.realm_name),
    ];
    for extra in &record.extra_categories {
        let extra = strip_category_markup(extra);
        if extra.is_empty() || categories.iter().any(|existing| existing == extra) {
            continue;
        }
        categories.push(extra.to_string());
    }
    categories
}

/// A subrealm page is also listed under its parent realm's category, ahead
/// of any other extras. Applied once per record before generation.
pub fn add_parent_realm_category(resolver: &MetadataResolver, record: &mut ObjectRecord) {
    let Some(parent) = resolver.parent_realm(&record.realm_name) else {
        return;
    };
    let category = format!("{parent} {OBJECTS_CATEGORY}");
    if !record
        .extra_categories
        .iter()
        .any(|extra| strip_category_markup(extra) == category)
    {
        record.extra_categories.insert(0, category);
    }
}

fn strip_category_markup(value: &str) -> &str {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("[[")
        .and_then(|inner| inner.strip_suffix("]]"))
        .unwrap_or(trimmed);
    trimmed.strip_prefix("Category:").unwrap_or(trimmed).trim()
}

fn push_overlays(out: &mut String, special: &SpecialCaseOverride) {
    if special.monochrome {
        out.push_str(MONOCHROME_OVERLAY);
        out.push('\n');
    }
    if let Some(image) = special
        .static_overlay_image
        .as_deref()
        .filter(|image| !image.trim().is_empty())
    {
        let opacity = special
            .static_overlay_opacity
            .unwrap_or(DEFAULT_OVERLAY_OPACITY)
            .clamp(0.0, 1.0);
        out.push_str(&format!(
            "<div style=\"position:fixed; top:0; left:0; right:0; bottom:0; z-index:2; pointer-events:none; background-image:url({{{{filepath:{image}}}}}); background-size:cover; background-repeat:repeat; opacity:{opacity};\"></div>\n"
        ));
    }
}

fn render_gallery(record: &ObjectRecord) -> String {
    let mut images: Vec<ImageRef> = record.images.clone();
    if let Some(old) = &record.old_image {
        if let Some(first) = images.first_mut()
            && first.caption.is_none()
        {
            first.caption = Some(CURRENT_IMAGE_CAPTION.to_string());
        }
        images.push(ImageRef::with_caption(old.clone(), OLD_IMAGE_CAPTION));
    }

    match images.as_slice() {
        [] => String::new(),
        [single] => format!("[[File:{}]]", single.file_name),
        many => {
            let mut gallery = String::from("<gallery>\n");
            for image in many {
                match image.caption.as_deref().filter(|caption| !caption.is_empty()) {
                    Some(caption) => gallery.push_str(&format!("{}|{caption}\n", image.file_name)),
                    None => gallery.push_str(&format!("{}\n", image.file_name)),
                }
            }
            gallery.push_str("</gallery>");
            gallery
        }
    }
}

fn tier_badge(tier: &DifficultyTier) -> String {
    format!(
        "[[File:{}|link=]] <span style=\"color:{}\">'''<b>{}</b>'''</span>",
        tier.icon_ref, tier.color_hex, tier.name
    )
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
