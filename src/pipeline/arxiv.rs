//! Academic-paper extraction for arXiv.
//!
//! ## Data Flow
//!
//! ```text
//! fetch_metadata ─┐
//!                 ├─▶ inventory ─▶ rasterise ─▶ rewrite ─▶ pandoc ─▶ Markdown
//! download_source ┘   {path,kind}   (pdfium)   (\includegraphics)
//! ```
//!
//! The source archive is unpacked once into a scratch directory and
//! described by a flat [`Inventory`]. The figure fix-up is two passes over
//! that inventory: rasterise every PDF figure, then rewrite every `.tex`
//! file whose `\includegraphics` points at one. The renderer only runs
//! after both passes, so it never sees a vector figure reference.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::pipeline::command::{self, Invocation};
use crate::pipeline::input;
use crate::pipeline::render::{self, FigureJob};
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paper metadata from the Atom export API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: String,
    pub abstract_text: String,
    /// Category codes, primary first (e.g. `cs.CL`, `cs.LG`).
    pub categories: Vec<String>,
}

/// What a file in the source archive is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Tex,
    /// PDF figure; rasterised before rendering.
    PdfFigure,
    /// EPS/PS figure; left as-is.
    PostScriptFigure,
    RasterFigure,
    Other,
}

impl FileKind {
    fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tex" => FileKind::Tex,
            "pdf" => FileKind::PdfFigure,
            "eps" | "ps" => FileKind::PostScriptFigure,
            "png" | "jpg" | "jpeg" | "gif" => FileKind::RasterFigure,
            _ => FileKind::Other,
        }
    }
}

/// One unpacked file, relative to [`Inventory::root`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Flat listing of an unpacked source archive.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub root: PathBuf,
    pub entries: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn of_kind(&self, kind: FileKind) -> impl Iterator<Item = &InventoryEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }
}

/// Output of the academic branch.
#[derive(Debug, Clone)]
pub struct RenderedPaper {
    pub metadata: Metadata,
    /// Markdown with the abstract prepended.
    pub markdown: String,
    /// Directory image references in `markdown` are relative to.
    pub asset_root: PathBuf,
}

/// Run the whole academic branch for `id` inside `scratch`.
pub async fn extract(
    client: &reqwest::Client,
    id: &str,
    scratch: &Path,
    config: &ArchiveConfig,
) -> Result<RenderedPaper, ArchiveError> {
    let metadata = fetch_metadata(client, &config.arxiv_api_url, id).await?;
    if metadata.title.is_empty() {
        return Err(ArchiveError::MetadataFailed {
            id: id.to_string(),
            reason: "entry has an empty title".into(),
        });
    }
    info!("arXiv {}: {}", id, metadata.title);

    let mut inventory = download_source(client, &config.arxiv_source_url, id, scratch).await?;
    let converted = rasterise_figures(&mut inventory, config.figure_max_pixels).await?;
    let rewritten = rewrite_references(&inventory, &converted).await?;
    debug!(
        "Figure fix-up: {} rasterised, {} tex files rewritten",
        converted.len(),
        rewritten
    );

    let main_tex = find_main_tex(&inventory).await.ok_or_else(|| ArchiveError::SourceArchive {
        id: id.to_string(),
        reason: "no .tex file with \\documentclass".into(),
    })?;
    let rendered = render_latex(
        &inventory.root,
        &main_tex,
        &config.renderer_program,
        Duration::from_secs(config.renderer_timeout_secs),
    )
    .await?;

    let asset_root = inventory
        .root
        .join(&main_tex)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| inventory.root.clone());

    let markdown = with_abstract(&metadata.abstract_text, &rendered);
    Ok(RenderedPaper {
        metadata,
        markdown,
        asset_root,
    })
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// Look `id` up in the Atom export API.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    api_url: &str,
    id: &str,
) -> Result<Metadata, ArchiveError> {
    let url = format!("{}?id_list={}", api_url, id);
    let body = input::download_bytes(client, &url).await?;
    let xml = String::from_utf8_lossy(&body);
    parse_atom(&xml).map_err(|reason| ArchiveError::MetadataFailed {
        id: id.to_string(),
        reason,
    })
}

/// Parse the first `<entry>` of an export API response.
pub fn parse_atom(xml: &str) -> Result<Metadata, String> {
    #[derive(PartialEq)]
    enum Field {
        None,
        Id,
        Title,
        Summary,
    }

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_entry = false;
    let mut seen_entry = false;
    let mut field = Field::None;
    let mut entry_id = String::new();
    let mut title = String::new();
    let mut summary = String::new();
    let mut categories: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" if !seen_entry => in_entry = true,
                b"id" if in_entry => field = Field::Id,
                b"title" if in_entry => field = Field::Title,
                b"summary" if in_entry => field = Field::Summary,
                _ => {}
            },
            Ok(Event::Empty(e)) if in_entry => {
                let name = e.local_name();
                if name.as_ref() == b"category" || name.as_ref() == b"primary_category" {
                    if let Ok(Some(attr)) = e.try_get_attribute("term") {
                        let term = attr.unescape_value().map_err(|e| e.to_string())?;
                        if !categories.iter().any(|c| c == term.as_ref()) {
                            if name.as_ref() == b"primary_category" {
                                categories.insert(0, term.into_owned());
                            } else {
                                categories.push(term.into_owned());
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(e)) if in_entry && field != Field::None => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                match field {
                    Field::Id => entry_id.push_str(&text),
                    Field::Title => title.push_str(&text),
                    Field::Summary => summary.push_str(&text),
                    Field::None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"entry" if in_entry => {
                    in_entry = false;
                    seen_entry = true;
                }
                b"id" | b"title" | b"summary" => field = Field::None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid Atom XML: {e}")),
            _ => {}
        }
        buf.clear();
    }

    if !seen_entry {
        return Err("no entry in response".into());
    }
    if entry_id.contains("/api/errors") {
        return Err(collapse_ws(&summary));
    }

    Ok(Metadata {
        title: collapse_ws(&title),
        abstract_text: collapse_ws(&summary),
        categories,
    })
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Source archive ───────────────────────────────────────────────────────────

/// Download the e-print for `id` and unpack it under `dir`.
pub async fn download_source(
    client: &reqwest::Client,
    source_url: &str,
    id: &str,
    dir: &Path,
) -> Result<Inventory, ArchiveError> {
    let url = format!("{}/{}", source_url.trim_end_matches('/'), id);
    info!("Downloading source archive: {}", url);
    let bytes = input::download_bytes(client, &url).await?;

    let root = dir.to_path_buf();
    let id_owned = id.to_string();
    tokio::task::spawn_blocking(move || unpack(&bytes, &root))
        .await
        .map_err(|e| ArchiveError::Internal(format!("Unpack task panicked: {}", e)))?
        .map_err(|reason| ArchiveError::SourceArchive {
            id: id_owned,
            reason,
        })
}

/// Unpack a gzip'd tar, a plain tar or a single gzip'd `.tex` into `root`.
pub fn unpack(bytes: &[u8], root: &Path) -> Result<Inventory, String> {
    let data = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| format!("gzip: {e}"))?;
        out
    } else {
        bytes.to_vec()
    };

    if data.starts_with(b"%PDF") {
        return Err("PDF-only submission, no LaTeX source".into());
    }

    let mut entries = Vec::new();
    if is_tar(&data) {
        let mut archive = tar::Archive::new(data.as_slice());
        for entry in archive.entries().map_err(|e| format!("tar: {e}"))? {
            let mut entry = entry.map_err(|e| format!("tar entry: {e}"))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = entry.path().map_err(|e| format!("tar path: {e}"))?.into_owned();
            if !is_safe_relative(&rel) {
                warn!("Skipping unsafe archive path {}", rel.display());
                continue;
            }
            // unpack_in creates parent directories and refuses traversal.
            if entry.unpack_in(root).map_err(|e| format!("unpack: {e}"))? {
                let kind = FileKind::from_path(&rel);
                entries.push(InventoryEntry { path: rel, kind });
            }
        }
    } else {
        let rel = PathBuf::from("main.tex");
        std::fs::write(root.join(&rel), &data).map_err(|e| format!("write: {e}"))?;
        entries.push(InventoryEntry {
            path: rel,
            kind: FileKind::Tex,
        });
    }

    Ok(Inventory {
        root: root.to_path_buf(),
        entries,
    })
}

fn is_tar(data: &[u8]) -> bool {
    data.len() > 262 && &data[257..262] == b"ustar"
}

/// True when `path` stays below whatever directory it is joined onto.
pub(crate) fn is_safe_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ── Figure fix-up ────────────────────────────────────────────────────────────

/// Rasterise every PDF figure to a sibling PNG and add it to the inventory.
///
/// Returns the converted figures keyed by their extension-less relative path
/// (forward slashes), mapped to the PNG's relative path.
pub async fn rasterise_figures(
    inventory: &mut Inventory,
    max_pixels: u32,
) -> Result<HashMap<String, PathBuf>, ArchiveError> {
    for eps in inventory.of_kind(FileKind::PostScriptFigure) {
        warn!(
            "PostScript figure {} left as-is (no rasteriser)",
            eps.path.display()
        );
    }

    let jobs: Vec<FigureJob> = inventory
        .of_kind(FileKind::PdfFigure)
        .map(|e| FigureJob {
            pdf: inventory.root.join(&e.path),
            png: inventory.root.join(e.path.with_extension("png")),
        })
        .collect();
    render::rasterise_pdf_figures(jobs, max_pixels).await?;

    let mut converted = HashMap::new();
    let mut added = Vec::new();
    for entry in inventory.of_kind(FileKind::PdfFigure) {
        let png = entry.path.with_extension("png");
        converted.insert(figure_key(&entry.path), png.clone());
        added.push(InventoryEntry {
            path: png,
            kind: FileKind::RasterFigure,
        });
    }
    inventory.entries.extend(added);
    Ok(converted)
}

static RE_INCLUDEGRAPHICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\includegraphics(\[[^\]]*\])?\{([^}]+)\}").unwrap());

/// Point every `\includegraphics` at a converted figure to its PNG.
///
/// Returns how many `.tex` files changed.
pub async fn rewrite_references(
    inventory: &Inventory,
    converted: &HashMap<String, PathBuf>,
) -> Result<usize, ArchiveError> {
    if converted.is_empty() {
        return Ok(0);
    }
    let mut changed = 0;
    for entry in inventory.of_kind(FileKind::Tex) {
        let path = inventory.root.join(&entry.path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ArchiveError::Internal(format!("read {}: {}", path.display(), e)))?;
        let tex = String::from_utf8_lossy(&bytes);
        let rewritten = rewrite_tex(&tex, converted);
        if rewritten != tex {
            tokio::fs::write(&path, rewritten.as_bytes())
                .await
                .map_err(|e| ArchiveError::Internal(format!("write {}: {}", path.display(), e)))?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Rewrite the `\includegraphics` targets in one file's text.
pub fn rewrite_tex(tex: &str, converted: &HashMap<String, PathBuf>) -> String {
    RE_INCLUDEGRAPHICS
        .replace_all(tex, |caps: &Captures| {
            let options = caps.get(1).map_or("", |m| m.as_str());
            let target = caps[2].trim();
            match lookup_figure(target, converted) {
                Some(_) => {
                    let stem = strip_figure_ext(target);
                    format!("\\includegraphics{}{{{}.png}}", options, stem)
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lookup_figure<'a>(target: &str, converted: &'a HashMap<String, PathBuf>) -> Option<&'a PathBuf> {
    let key = strip_figure_ext(target.trim_start_matches("./"));
    if let Some(png) = converted.get(key) {
        return Some(png);
    }
    // \graphicspath lets a reference omit the directory; accept a unique suffix match.
    let suffix = format!("/{key}");
    let mut matches = converted.iter().filter(|(k, _)| k.ends_with(&suffix));
    match (matches.next(), matches.next()) {
        (Some((_, png)), None) => Some(png),
        _ => None,
    }
}

fn strip_figure_ext(target: &str) -> &str {
    target
        .strip_suffix(".pdf")
        .or_else(|| target.strip_suffix(".PDF"))
        .unwrap_or(target)
}

fn figure_key(path: &Path) -> String {
    path.with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// Pick the main `.tex` file: the one declaring `\documentclass`.
pub async fn find_main_tex(inventory: &Inventory) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    for entry in inventory.of_kind(FileKind::Tex) {
        if let Ok(bytes) = tokio::fs::read(inventory.root.join(&entry.path)).await {
            if String::from_utf8_lossy(&bytes).contains("\\documentclass") {
                candidates.push(entry.path.clone());
            }
        }
    }
    candidates.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().to_string());
        let preferred = matches!(name.as_deref(), Some("main.tex") | Some("ms.tex"));
        (!preferred, p.components().count())
    });
    candidates.into_iter().next()
}

/// Render `main_tex` to Markdown with the typesetting renderer.
pub async fn render_latex(
    root: &Path,
    main_tex: &Path,
    program: &str,
    timeout: Duration,
) -> Result<String, ArchiveError> {
    let cwd = root
        .join(main_tex)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let file_name = main_tex
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.tex".to_string());

    info!("Rendering {} with {}", main_tex.display(), program);
    let argv = vec![program.to_string()];
    let stdout = command::run(
        Invocation::new(&argv)
            .arg(file_name)
            .arg("--from=latex")
            .arg("--to=gfm")
            .arg("--wrap=none")
            .cwd(&cwd)
            .timeout(Some(timeout)),
    )
    .await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Prepend the abstract as its own section.
pub fn with_abstract(abstract_text: &str, body: &str) -> String {
    if abstract_text.trim().is_empty() {
        return body.to_string();
    }
    format!("## Abstract\n\n{}\n\n{}", abstract_text.trim(), body)
}
