use serde::Deserialize;
use url::Url;

use crate::models::PrintJobSummary;

pub const APP_ORIGIN: &str = "https://app.3dprintwrap.com";

/// Where on the 3D Print Wrap app an import lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffTarget {
    /// App root. Carries print data only; used by popup and context-menu imports.
    #[default]
    Home,
    /// Print queue. Also carries the model title and page URL; used by the
    /// control injected into the Print Plates dialog.
    Queue,
}

impl HandoffTarget {
    fn path(self) -> &'static str {
        match self {
            HandoffTarget::Home => "",
            HandoffTarget::Queue => "/queue",
        }
    }

    fn includes_page_fields(self) -> bool {
        matches!(self, HandoffTarget::Queue)
    }
}

/// Serialize `summary` into a handoff URL. Empty fields are left out.
pub fn build_handoff_url(summary: &PrintJobSummary, target: HandoffTarget) -> Result<Url, serde_json::Error> {
    // APP_ORIGIN is a literal; the path suffixes are static.
    let mut url = Url::parse(&format!("{}{}", APP_ORIGIN, target.path())).expect("static app URL");

    let filaments = if summary.filaments.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&summary.filaments)?)
    };

    let mut params: Vec<(&str, &str)> = Vec::new();
    if target.includes_page_fields() {
        params.push(("title", summary.title.as_str()));
    }
    params.push(("printTime", summary.print_time.as_str()));
    params.push(("weight", summary.total_weight.as_str()));
    params.push(("nozzleSize", summary.nozzle_size.as_deref().unwrap_or("")));
    params.push(("filamentsData", filaments.as_deref().unwrap_or("")));
    params.push(("imageUrl", summary.image_url.as_str()));
    if target.includes_page_fields() {
        params.push(("pageUrl", summary.page_url.as_str()));
    }

    let present: Vec<_> = params.into_iter().filter(|(_, v)| !v.is_empty()).collect();
    if !present.is_empty() {
        url.query_pairs_mut().extend_pairs(present);
    }
    Ok(url)
}
