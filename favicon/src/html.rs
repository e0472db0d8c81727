//! Favicon `<link>` tags and the rewriting of existing ones.
//!
//! Two matchers are used on purpose. Stripping before injection only removes
//! tags whose `rel` is exactly `icon` or `shortcut icon`, so hand written
//! `apple-touch-icon` tags survive. Cache-busting touches every tag whose
//! `rel` mentions `icon`, except `apple-touch-icon`.

use crate::config::{InjectMode, ResolvedConfig, SizeFormat, SourceEmission};
use crate::raster::InputFormat;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};

/// Query parameter carrying the cache-busting token.
pub const TOKEN_PARAM: &str = "v";

/// Link tags with a `rel` of exactly `icon` or `shortcut icon`, including the
/// indentation before and the line break after them.
static ICON_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)[ \t]*<link\b[^>]*?\srel\s*=\s*(?:"(?:shortcut\s+)?icon"|'(?:shortcut\s+)?icon')[^>]*>(?:\r?\n)?"#,
    )
    .unwrap()
});

static LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<link\b[^>]*>").unwrap());

static REL_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:^|\s)rel\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static HREF_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(^|\s)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").unwrap());

/// A `<link rel="icon">` tag destined for the document head.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FaviconTag {
    pub rel: &'static str,
    pub mime_type: &'static str,
    pub sizes: String,
    pub href: String,
}

impl Display for FaviconTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"<link rel="{}" type="{}" sizes="{}" href="{}">"#,
            self.rel,
            self.mime_type,
            escape_attribute(&self.sizes),
            escape_attribute(&self.href)
        )
    }
}

/// Which tags are produced for a bundle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TagMode {
    Minimal,
    Full,
}

impl InjectMode {
    /// The tag mode, or `None` if tags are not injected at all.
    pub fn tag_mode(self) -> Option<TagMode> {
        match self {
            InjectMode::Off => None,
            InjectMode::Minimal => Some(TagMode::Minimal),
            InjectMode::Full => Some(TagMode::Full),
        }
    }
}

/// A per-size file that is part of a bundle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EmittedFile {
    pub size: u32,
    pub format: SizeFormat,
    pub file_name: String,
}

/// The source image as part of a bundle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EmittedSource {
    pub file_name: String,
    pub format: InputFormat,
}

/// Describes which files make up the favicon of a site.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EmittedBundle {
    /// File name of the combined icon
    pub ico_file: String,

    /// Every size contained in the combined icon
    pub sizes: Vec<u32>,

    /// The source image, if it is published as well
    pub source: Option<EmittedSource>,

    /// Per-size files, ordered by size and then format
    pub per_size: Vec<EmittedFile>,
}

impl EmittedBundle {
    /// The bundle a build with `config` produces.
    pub fn planned(config: &ResolvedConfig) -> Self {
        let source = match &config.source {
            SourceEmission::Disabled => None,
            SourceEmission::Enabled { file_name } => Some(EmittedSource {
                file_name: file_name.clone(),
                format: config.format,
            }),
        };

        let emission = &config.sizes_emission;
        let per_size = config
            .generation
            .sizes
            .iter()
            .flat_map(|&size| {
                emission.formats.iter().map(move |&format| EmittedFile {
                    size,
                    format,
                    file_name: emission.file_name(size, format),
                })
            })
            .collect();

        Self {
            ico_file: config.output_name.clone(),
            sizes: config.generation.sizes.clone(),
            source,
            per_size,
        }
    }
}

/// Builds the link tags describing `bundle`.
///
/// The combined icon always comes first, followed by the SVG source (if it
/// is part of the bundle) and, in full mode, one tag per per-size file. Each
/// href gets the cache token appended if one is given.
pub fn build_favicon_tags(
    bundle: &EmittedBundle,
    base: &str,
    mode: TagMode,
    token: Option<&str>,
) -> Vec<FaviconTag> {
    let href = |file_name: &str| {
        let url = format!("{}{}", base, file_name);
        match token {
            Some(token) => with_cache_token(&url, token),
            None => url,
        }
    };

    let mut tags = Vec::with_capacity(2 + bundle.per_size.len());

    tags.push(FaviconTag {
        rel: "icon",
        mime_type: SizeFormat::Ico.mime_type(),
        sizes: bundle
            .sizes
            .iter()
            .map(|size| format!("{0}x{0}", size))
            .collect::<Vec<_>>()
            .join(" "),
        href: href(&bundle.ico_file),
    });

    if let Some(source) = bundle.source.as_ref().filter(|s| s.format.is_vector()) {
        tags.push(FaviconTag {
            rel: "icon",
            mime_type: source.format.mime_type(),
            sizes: "any".to_owned(),
            href: href(&source.file_name),
        });
    }

    if mode == TagMode::Full {
        tags.extend(bundle.per_size.iter().map(|file| FaviconTag {
            rel: "icon",
            mime_type: file.format.mime_type(),
            sizes: format!("{0}x{0}", file.size),
            href: href(&file.file_name),
        }));
    }

    tags
}

/// Returns true if `tag` is a link whose `rel` is exactly `icon` or
/// `shortcut icon`.
pub fn is_icon_link(tag: &str) -> bool {
    ICON_LINK.is_match(tag)
}

/// Removes every `icon`/`shortcut icon` link from the document.
pub fn strip_icon_links(html: &str) -> Cow<'_, str> {
    ICON_LINK.replace_all(html, "")
}

/// Appends `token` to the href of every link whose `rel` mentions `icon`,
/// replacing a previously appended token.
pub fn cache_bust_icon_links<'a>(html: &'a str, token: &str) -> Cow<'a, str> {
    LINK_TAG.replace_all(html, |tag: &Captures| {
        let tag = &tag[0];
        if !is_cache_bustable(tag) {
            return tag.to_owned();
        }

        HREF_ATTRIBUTE
            .replace(tag, |href: &Captures| {
                let (value, quote) = match (href.get(2), href.get(3)) {
                    (Some(value), _) => (value.as_str(), '"'),
                    (None, Some(value)) => (value.as_str(), '\''),
                    (None, None) => return href[0].to_owned(),
                };

                format!(
                    "{0}href={2}{1}{2}",
                    &href[1],
                    with_cache_token(value, token),
                    quote
                )
            })
            .into_owned()
    })
}

fn is_cache_bustable(tag: &str) -> bool {
    let Some(rel) = REL_ATTRIBUTE.captures(tag) else {
        return false;
    };

    let rel = rel
        .get(1)
        .or_else(|| rel.get(2))
        .map(|value| value.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    rel.contains("icon") && !rel.contains("apple-touch-icon")
}

/// Sets the token query parameter of `url`, keeping other parameters and the
/// fragment intact.
pub fn with_cache_token(url: &str, token: &str) -> String {
    let (url, fragment) = match url.split_once('#') {
        Some((url, fragment)) => (url, Some(fragment)),
        None => (url, None),
    };
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    let mut params = query
        .split('&')
        .filter(|param| {
            !param.is_empty()
                && param.split('=').next() != Some(TOKEN_PARAM)
        })
        .collect::<Vec<_>>();
    let token_param = format!("{}={}", TOKEN_PARAM, token);
    params.push(&token_param);

    let mut result = format!("{}?{}", path, params.join("&"));
    if let Some(fragment) = fragment {
        result.push('#');
        result.push_str(fragment);
    }

    result
}

fn escape_attribute(value: &str) -> Cow<'_, str> {
    if value.contains(['&', '"', '<']) {
        Cow::Owned(
            value
                .replace('&', "&amp;")
                .replace('"', "&quot;")
                .replace('<', "&lt;"),
        )
    } else {
        Cow::Borrowed(value)
    }
}

/// The result of transforming an HTML document.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HtmlTransform {
    /// The rewritten document
    pub text: String,

    /// Tags the host should insert into the document head
    pub tags: Vec<FaviconTag>,
}

impl HtmlTransform {
    /// Rewrites a document according to the inject mode. With injection
    /// disabled existing icon links are cache-busted when a token is given,
    /// otherwise they are replaced by freshly built tags.
    pub fn new(
        html: &str,
        mode: InjectMode,
        bundle: &EmittedBundle,
        base: &str,
        token: Option<&str>,
    ) -> Self {
        match mode.tag_mode() {
            None => Self {
                text: match token {
                    Some(token) => cache_bust_icon_links(html, token).into_owned(),
                    None => html.to_owned(),
                },
                tags: Vec::new(),
            },
            Some(tag_mode) => Self {
                text: strip_icon_links(html).into_owned(),
                tags: build_favicon_tags(bundle, base, tag_mode, token),
            },
        }
    }

    /// Inserts the tags before `</head>`, or at the start of the document if
    /// it has no head.
    pub fn into_document(self) -> String {
        if self.tags.is_empty() {
            return self.text;
        }

        let rendered = self
            .tags
            .iter()
            .map(|tag| format!("    {}\n", tag))
            .collect::<String>();

        match HEAD_CLOSE.find(&self.text) {
            Some(head_close) => {
                let mut document = String::with_capacity(self.text.len() + rendered.len());
                document.push_str(&self.text[..head_close.start()]);
                document.push_str(&rendered);
                document.push_str(&self.text[head_close.start()..]);
                document
            }
            None => rendered + &self.text,
        }
    }
}
