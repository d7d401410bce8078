use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::aggregate::{summarize, FilamentReading, PageMeta, PlateReading};
use crate::models::{PageSource, PrintJobSummary};
use crate::parse::{clean_material, parse_background, parse_duration_minutes, parse_grams};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "printwrap-importer/0.1";
pub const DIALOG_TITLE: &str = "Print Plates";
pub const SUPPORTED_HOST: &str = "makerworld.com";
pub const COPY_BUTTON_ID: &str = "copy-to-3dprintwrap-btn";

// ── Lazy static selectors ────────────────────────────────────────────────────

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static DIALOG_SEL: Lazy<Selector> = Lazy::new(|| selector(".MuiDialog-paper"));
static DIALOG_TITLE_SEL: Lazy<Selector> = Lazy::new(|| selector(".MuiDialogTitle-root p"));
pub(crate) static DIALOG_CONTENT_SEL: Lazy<Selector> = Lazy::new(|| selector(".MuiDialogContent-root"));
pub(crate) static COPY_BUTTON_SEL: Lazy<Selector> = Lazy::new(|| selector(&format!("#{}", COPY_BUTTON_ID)));

static PLATE_SEL: Lazy<Selector> = Lazy::new(|| selector(".mw-css-8atqhb"));
static TIME_SEL: Lazy<Selector> =
    Lazy::new(|| selector(".config_info .mw-css-18oolko:first-child span"));
static WEIGHT_SEL: Lazy<Selector> =
    Lazy::new(|| selector(".config_info .mw-css-18oolko:nth-child(2) span"));
static NOZZLE_SEL: Lazy<Selector> =
    Lazy::new(|| selector(".config_info .mw-css-18oolko:nth-child(3) span"));
static FILAMENT_SEL: Lazy<Selector> = Lazy::new(|| selector(".filaments_info .mw-css-sbssk2"));
static MATERIAL_SEL: Lazy<Selector> = Lazy::new(|| selector(".mw-css-bg3st0"));
static FILAMENT_WEIGHT_SEL: Lazy<Selector> = Lazy::new(|| selector(".mw-css-1qxtz39"));

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| selector("h1.title-for-share"));
static ACTIVE_SLIDE_IMG_SEL: Lazy<Selector> =
    Lazy::new(|| selector(".swiper-slide.swiper-slide-active img"));
static ANY_SLIDE_IMG_SEL: Lazy<Selector> = Lazy::new(|| selector(".swiper-slide img"));

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("URL did not return HTML")]
    NotHtml,
    #[error("Upstream returned an error")]
    Upstream,
    #[error("{0}")]
    Request(String),
    #[error("Print Plates dialog not found on the page")]
    DialogNotFound,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Extract a summary from posted markup, or fetch the page when none is given.
pub async fn extract_page(source: &PageSource, insecure_ssl: bool) -> Result<PrintJobSummary, ExtractionError> {
    match &source.html {
        Some(html) => extract_from_html(html, &source.url),
        None => {
            let url = validate_url(&source.url)?;
            let html = fetch_html(url, insecure_ssl).await?;
            extract_from_html(&html, &source.url)
        }
    }
}

/// Whether `url` points at a MakerWorld page.
pub fn is_supported_page(url: &str) -> bool {
    validate_url(url).is_ok()
}

/// Whether `url` names a page snapshot saved on this machine.
pub fn is_local_snapshot(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| u.scheme() == "file")
}

// ── Fetching ─────────────────────────────────────────────────────────────────

/// Only https pages on makerworld.com or one of its subdomains are fetched.
fn validate_url(url: &str) -> Result<Url, ExtractionError> {
    let parsed = Url::parse(url).map_err(|e| ExtractionError::InvalidUrl(format!("Invalid URL: {}", e)))?;
    let on_makerworld = parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .is_some_and(|host| host == SUPPORTED_HOST || host.ends_with(".makerworld.com"));
    if parsed.scheme() == "https" && on_makerworld {
        Ok(parsed)
    } else {
        Err(ExtractionError::InvalidUrl(format!("Not a makerworld.com page: {}", url)))
    }
}

async fn fetch_html(url: Url, insecure: bool) -> Result<String, ExtractionError> {
    let request_failed = |e: reqwest::Error| ExtractionError::Request(e.to_string());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(request_failed)?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/html")
        .send()
        .await
        .map_err(request_failed)?;
    if !response.status().is_success() {
        return Err(ExtractionError::Upstream);
    }

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
    if !is_html {
        return Err(ExtractionError::NotHtml);
    }

    response.text().await.map_err(request_failed)
}

// ── Main extraction pipeline ─────────────────────────────────────────────────

pub fn extract_from_html(html: &str, page_url: &str) -> Result<PrintJobSummary, ExtractionError> {
    let document = Html::parse_document(html);
    let dialog = print_plates_dialogs(&document)
        .next()
        .ok_or(ExtractionError::DialogNotFound)?;
    Ok(extract_from_dialog(&document, dialog, page_url))
}

/// Read every plate in `dialog` plus the page-level title and thumbnail.
pub fn extract_from_dialog(document: &Html, dialog: ElementRef<'_>, page_url: &str) -> PrintJobSummary {
    let page = PageMeta {
        title: document
            .select(&TITLE_SEL)
            .next()
            .map(|el| collect_text(el).trim().to_string())
            .unwrap_or_default(),
        image_url: thumbnail_url(document, page_url).unwrap_or_default(),
        page_url: page_url.to_string(),
    };

    let summary = summarize(dialog.select(&PLATE_SEL).map(read_plate), page);
    tracing::debug!(?summary, "extracted print data");
    summary
}

/// Print Plates dialogs present in the document, augmented or not.
pub fn print_plates_dialogs(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.select(&DIALOG_SEL).filter(|dialog| {
        dialog
            .select(&DIALOG_TITLE_SEL)
            .next()
            .is_some_and(|title| collect_text(title).contains(DIALOG_TITLE))
    })
}

// ── Plate fields ─────────────────────────────────────────────────────────────

fn read_plate(plate: ElementRef<'_>) -> PlateReading {
    PlateReading {
        minutes: first_text(plate, &TIME_SEL)
            .map(|t| parse_duration_minutes(&t))
            .unwrap_or(0),
        grams: first_text(plate, &WEIGHT_SEL)
            .and_then(|t| parse_grams(&t))
            .unwrap_or(0),
        nozzle: first_text(plate, &NOZZLE_SEL).filter(|t| !t.is_empty()),
        filaments: plate.select(&FILAMENT_SEL).map(read_filament).collect(),
    }
}

fn read_filament(chip: ElementRef<'_>) -> FilamentReading {
    FilamentReading {
        material: first_text(chip, &MATERIAL_SEL)
            .map(|t| clean_material(&t))
            .unwrap_or_default(),
        color: chip
            .value()
            .attr("style")
            .and_then(parse_background)
            .unwrap_or_default(),
        grams: first_text(chip, &FILAMENT_WEIGHT_SEL)
            .and_then(|t| parse_grams(&t))
            .unwrap_or(0),
    }
}

// ── Image helpers ────────────────────────────────────────────────────────────

/// Active slide first, then the first slide that has an image source.
fn thumbnail_url(document: &Html, page_url: &str) -> Option<String> {
    let src = document
        .select(&ACTIVE_SLIDE_IMG_SEL)
        .next()
        .and_then(img_src)
        .or_else(|| document.select(&ANY_SLIDE_IMG_SEL).find_map(img_src))?;

    match Url::parse(page_url) {
        Ok(base) => Some(base.join(&src).map(|u| u.to_string()).unwrap_or(src)),
        Err(_) => Some(src),
    }
}

fn img_src(img: ElementRef<'_>) -> Option<String> {
    img.value()
        .attr("src")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ── DOM utility helpers ──────────────────────────────────────────────────────

/// Trimmed text of the first match of `sel` under `el`.
fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel).next().map(|m| collect_text(m).trim().to_string())
}

/// Recursively collect all text from an element and its descendants.
pub(crate) fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}
