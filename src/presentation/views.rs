use askama::{Error as AskamaError, Template};
use axum::http::StatusCode;
use thiserror::Error;

use crate::{
    application::{
        calculation::{LoadFailure, RenderedView},
        engines::{NitrogenBalance, NormFilling},
        error::HttpError,
    },
    cache::{CachedEntry, CachedResult},
    domain::ids::EntityId,
};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: &T) -> Result<String, TemplateRenderError> {
    template.render().map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
    })
}

/// Page chrome for a calculation result type.
pub trait ResultPresenter: CachedResult {
    const TITLE: &'static str;
    const ENTITY_LABEL: &'static str;

    fn render_entry(
        entry: &CachedEntry<Self>,
        provenance: Provenance,
    ) -> Result<String, TemplateRenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Cached,
    Fresh,
}

impl Provenance {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fresh => "fresh",
        }
    }
}

#[derive(Template)]
#[template(path = "shell.html")]
pub struct ShellTemplate<'a> {
    pub title: &'a str,
    pub entity_label: &'a str,
    pub entity: &'a str,
}

#[derive(Template)]
#[template(path = "page_end.html")]
pub struct PageEndTemplate;

#[derive(Template)]
#[template(path = "partials/nitrogen_balance.html")]
pub struct NitrogenBalanceTemplate<'a> {
    pub balance: &'a NitrogenBalance,
    pub provenance: &'static str,
    pub input_hash: &'a str,
}

#[derive(Template)]
#[template(path = "partials/norm_filling.html")]
pub struct NormFillingTemplate<'a> {
    pub filling: &'a NormFilling,
    pub provenance: &'static str,
    pub input_hash: &'a str,
}

#[derive(Template)]
#[template(path = "partials/failure.html")]
pub struct FailureTemplate<'a> {
    pub headline: &'a str,
    pub detail: &'a str,
    pub code: &'a str,
}

#[derive(Template)]
#[template(path = "partials/cache_miss.html")]
pub struct CacheMissTemplate<'a> {
    pub location: &'a str,
    pub location_literal: String,
}

impl ResultPresenter for NitrogenBalance {
    const TITLE: &'static str = "Nitrogen balance";
    const ENTITY_LABEL: &'static str = "Field";

    fn render_entry(
        entry: &CachedEntry<Self>,
        provenance: Provenance,
    ) -> Result<String, TemplateRenderError> {
        render_template(&NitrogenBalanceTemplate {
            balance: &entry.result,
            provenance: provenance.label(),
            input_hash: entry.input_hash.short(),
        })
    }
}

impl ResultPresenter for NormFilling {
    const TITLE: &'static str = "Norm filling";
    const ENTITY_LABEL: &'static str = "Farm";

    fn render_entry(
        entry: &CachedEntry<Self>,
        provenance: Provenance,
    ) -> Result<String, TemplateRenderError> {
        render_template(&NormFillingTemplate {
            filling: &entry.result,
            provenance: provenance.label(),
            input_hash: entry.input_hash.short(),
        })
    }
}

pub fn render_shell<T: ResultPresenter>(entity: &EntityId) -> Result<String, TemplateRenderError> {
    render_template(&ShellTemplate {
        title: T::TITLE,
        entity_label: T::ENTITY_LABEL,
        entity: entity.as_str(),
    })
}

pub fn render_page_end() -> Result<String, TemplateRenderError> {
    render_template(&PageEndTemplate)
}

/// HTML for a settled view. `None` when nothing should replace the fallback.
pub fn render_view<T: ResultPresenter>(
    view: &RenderedView<T>,
) -> Result<Option<String>, TemplateRenderError> {
    match view {
        RenderedView::Pending => Ok(None),
        RenderedView::Cached(entry) => T::render_entry(entry, Provenance::Cached).map(Some),
        RenderedView::Fresh(entry) | RenderedView::Detached(entry) => {
            T::render_entry(entry, Provenance::Fresh).map(Some)
        }
        RenderedView::CacheMiss { location } => render_template(&CacheMissTemplate {
            location,
            location_literal: script_literal(location),
        })
        .map(Some),
        RenderedView::Failed(failure) => render_failure(failure).map(Some),
    }
}

fn render_failure(failure: &LoadFailure) -> Result<String, TemplateRenderError> {
    match failure {
        LoadFailure::Calculation(err) => render_template(&FailureTemplate {
            headline: "The calculation could not be completed",
            detail: &err.to_string(),
            code: err.code(),
        }),
        LoadFailure::Programmer(_) => render_template(&FailureTemplate {
            headline: "Internal error",
            detail: "The calculation input could not be prepared.",
            code: "internal",
        }),
        LoadFailure::Cancelled => render_template(&FailureTemplate {
            headline: "The calculation was interrupted",
            detail: "Reload the page to try again.",
            code: "cancelled",
        }),
    }
}

/// JSON string literal safe to embed in an inline script.
fn script_literal(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::calculation::CalculationError,
        cache::hash_value,
    };

    fn balance_entry() -> CachedEntry<NitrogenBalance> {
        CachedEntry {
            result: NitrogenBalance {
                field_id: "field-1".to_string(),
                supply_kg_n_per_ha: 27,
                removal_kg_n_per_ha: 160,
                balance_kg_n_per_ha: -133,
                application_count: 1,
            },
            input_hash: hash_value(&serde_json::json!({ "field": 1 })).unwrap(),
        }
    }

    #[test]
    fn fresh_and_cached_views_are_labelled() {
        let fresh = render_view(&RenderedView::Fresh(balance_entry()))
            .unwrap()
            .unwrap();
        let cached = render_view(&RenderedView::Cached(balance_entry()))
            .unwrap()
            .unwrap();

        assert!(fresh.contains("data-provenance=\"fresh\""), "{fresh}");
        assert!(cached.contains("data-provenance=\"cached\""), "{cached}");
        assert!(fresh.contains("-133"));
    }

    #[test]
    fn pending_view_renders_nothing() {
        assert!(
            render_view::<NitrogenBalance>(&RenderedView::Pending)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn detached_results_render_like_fresh_ones() {
        let html = render_view(&RenderedView::Detached(balance_entry()))
            .unwrap()
            .unwrap();
        assert!(html.contains("data-provenance=\"fresh\""), "{html}");
    }

    #[test]
    fn failures_show_the_engine_message() {
        let html = render_view::<NitrogenBalance>(&RenderedView::Failed(
            LoadFailure::Calculation(CalculationError::missing_parameter("crop `quinoa`")),
        ))
        .unwrap()
        .unwrap();
        assert!(html.contains("missing_parameter"));
        assert!(html.contains("quinoa"));
    }

    #[test]
    fn cache_miss_replaces_location() {
        let html = render_view::<NitrogenBalance>(&RenderedView::CacheMiss {
            location: "/fields/f1/nitrogen-balance?view=table".to_string(),
        })
        .unwrap()
        .unwrap();
        assert!(html.contains("location.replace(\"/fields/f1/nitrogen-balance?view=table\")"));
        assert!(html.contains("<noscript>"));
    }

    #[test]
    fn script_literal_cannot_close_the_script() {
        assert_eq!(script_literal("/a</script>"), "\"/a\\u003c/script\\u003e\"");
    }
}
