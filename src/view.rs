use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, RequestCache};
use crate::normalize::{NormalizedRow, RankedRow, RowKind, SchemaHints, normalize_rows, rank_rows};
use crate::period::{self, Period, THIS_YEAR};
use crate::rpc::{Params, RemoteError, ResultEnvelope};
use crate::staleness::{ConsumerId, RequestSequencer};
use crate::sync::{AddressBar, FilterState, StateSynchronizer};

pub const ORGANIZATION_PARAM: &str = "org_id";
pub const PERIOD_PARAM: &str = "period";
pub const PERIOD_START_PARAM: &str = "period_start";
pub const PERIOD_END_PARAM: &str = "period_end";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    pub procedure: String,
    pub hints: SchemaHints,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, procedure: impl Into<String>, kind: RowKind) -> Self {
        Self {
            name: name.into(),
            procedure: procedure.into(),
            hints: SchemaHints::new(kind),
        }
    }

    pub fn with_hints(mut self, hints: SchemaHints) -> Self {
        self.hints = hints;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    pub organization: Option<String>,
    pub period: Option<String>,
    pub filters: BTreeMap<String, String>,
}

impl ViewQuery {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: Some(organization.into()),
            ..Self::default()
        }
    }

    pub fn with_period(mut self, label: impl Into<String>) -> Self {
        self.period = Some(label.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn from_filters(organization: Option<String>, state: &FilterState) -> Self {
        let mut query = Self {
            organization,
            ..Self::default()
        };
        for (field, value) in state {
            let Some(value) = value else { continue };
            if field == PERIOD_PARAM {
                query.period = Some(value.clone());
            } else {
                query.filters.insert(field.clone(), value.clone());
            }
        }
        query
    }

    pub fn with_overrides<B: AddressBar>(
        organization: Option<String>,
        sync: &mut StateSynchronizer<B>,
        period: Option<&str>,
        filters: Vec<(String, String)>,
    ) -> Self {
        let mut untracked = Vec::new();
        for (key, value) in period
            .map(|label| (PERIOD_PARAM.to_string(), label.to_string()))
            .into_iter()
            .chain(filters)
        {
            if sync.state().contains_key(&key) {
                sync.set(&key, Some(&value));
            } else {
                untracked.push((key, value));
            }
        }

        let mut query = Self::from_filters(organization, sync.state());
        for (key, value) in untracked {
            query = if key == PERIOD_PARAM {
                query.with_period(value)
            } else {
                query.with_filter(key, value)
            };
        }
        query
    }

    /// `None` until every required parameter is known. Callers must not fetch
    /// before this returns `Some`.
    pub fn ready<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<(Period, Params)> {
        let organization = self
            .organization
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;
        let period = period::resolve(self.period.as_deref().unwrap_or(THIS_YEAR), now);

        let mut params = Params::new();
        for (key, value) in &self.filters {
            params.insert(key.clone(), Value::String(value.clone()));
        }
        params.insert(
            ORGANIZATION_PARAM.to_string(),
            Value::String(organization.to_string()),
        );
        params.insert(PERIOD_PARAM.to_string(), Value::String(period.label.clone()));
        params.insert(
            PERIOD_START_PARAM.to_string(),
            Value::String(period.start.to_rfc3339()),
        );
        params.insert(
            PERIOD_END_PARAM.to_string(),
            Value::String(period.end.to_rfc3339()),
        );
        Some((period, params))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub view: String,
    pub period: Period,
    pub rows: Vec<NormalizedRow>,
}

impl ViewModel {
    pub fn ranked(&self) -> Vec<RankedRow> {
        rank_rows(self.rows.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Applied(ViewModel),
    Failed(RemoteError),
    Stale,
    NotReady,
}

pub struct ViewLoader {
    cache: RequestCache,
    sequencer: RequestSequencer,
    view: Arc<ViewDefinition>,
}

impl ViewLoader {
    pub fn new(cache: RequestCache, consumer: ConsumerId, view: ViewDefinition) -> Self {
        Self {
            cache,
            sequencer: RequestSequencer::new(consumer),
            view: Arc::new(view),
        }
    }

    pub fn view(&self) -> &ViewDefinition {
        &self.view
    }

    pub fn sequencer(&self) -> &RequestSequencer {
        &self.sequencer
    }

    pub async fn load<Tz: TimeZone>(&self, query: &ViewQuery, now: &DateTime<Tz>) -> LoadOutcome {
        let Some((period, params)) = query.ready(now) else {
            debug!(view = %self.view.name, "view not ready, skipping fetch");
            return LoadOutcome::NotReady;
        };
        let ticket = self.sequencer.begin();
        let key = CacheKey::new(&self.view.procedure, &params);
        let envelope = self
            .cache
            .acquire(key, &self.view.procedure, params)
            .await;

        match self.sequencer.accept(&ticket, envelope) {
            Some(envelope) => self.apply(&envelope, period),
            None => LoadOutcome::Stale,
        }
    }

    pub fn teardown(&self) {
        self.sequencer.invalidate();
    }

    fn apply(&self, envelope: &ResultEnvelope, period: Period) -> LoadOutcome {
        if let Some(error) = envelope.error() {
            return LoadOutcome::Failed(error.clone());
        }
        let rows = normalize_rows(envelope.data().unwrap_or_default(), &self.view.hints);
        LoadOutcome::Applied(ViewModel {
            view: self.view.name.clone(),
            period,
            rows,
        })
    }
}
