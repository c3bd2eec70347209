//! Survey definition loading and caching
//!
//! Definitions are read-mostly and immutable per `(survey_id, version)`, so
//! they cache well. The cache is best-effort: Redis faults fall through to
//! the database.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, OptionExt};
use crate::models::{Survey, SurveyDefinition};
use crate::redis::RedisManager;
use crate::state::AppState;

/// A survey row with its parsed definition document
#[derive(Debug, Clone)]
pub struct LoadedSurvey {
    pub survey: Survey,
    pub definition: SurveyDefinition,
}

fn cache_key(survey_id: Uuid, version: i32) -> String {
    format!("survey:def:{}:{}", survey_id, version)
}

/// Load a survey and its definition, serving the definition from cache when
/// the stored version matches.
pub async fn load_survey(state: &AppState, survey_id: Uuid) -> Result<LoadedSurvey, AppError> {
    let survey: Survey = sqlx::query_as::<_, Survey>("SELECT * FROM surveys WHERE id = $1")
        .bind(survey_id)
        .fetch_optional(state.db())
        .await?
        .ok_or_not_found("Survey")?;

    let key = cache_key(survey.id, survey.version);
    let mut redis = RedisManager {
        connection: state.redis(),
    };

    match redis.get_json::<SurveyDefinition>(&key).await {
        Ok(Some(definition)) => {
            debug!(%survey_id, version = survey.version, "Definition cache hit");
            return Ok(LoadedSurvey { survey, definition });
        }
        Ok(None) => {}
        Err(e) => warn!("Definition cache read failed: {}", e),
    }

    let definition = survey
        .parsed_definition()
        .map_err(|e| AppError::SurveyConfiguration(format!("Unparseable definition: {}", e)))?;

    let ttl = state.config().runtime.definition_cache_ttl_secs;
    if let Err(e) = redis.set_json(&key, &definition, Some(ttl)).await {
        warn!("Definition cache write failed: {}", e);
    }

    Ok(LoadedSurvey { survey, definition })
}

/// Drop the cached definition for a survey version. Called on publish.
pub async fn invalidate_cache(state: &AppState, survey_id: Uuid, version: i32) {
    let mut redis = RedisManager {
        connection: state.redis(),
    };
    if let Err(e) = redis.delete(&cache_key(survey_id, version)).await {
        warn!("Definition cache invalidation failed: {}", e);
    }
}
