//! Database seeding module
//!
//! Seeds a demo survey with a PUBLIC collector so the runtime is exercisable
//! out of the box. Sample data is development-only; there is no essential
//! production seed for the runtime.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

const DEMO_SLUG: &str = "demo-feedback";

/// Seed development sample data: one published survey with three pages and a
/// public collector under the slug `demo-feedback`. Idempotent.
pub async fn seed_sample_data(pool: &PgPool) -> Result<()> {
    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM collectors WHERE slug = $1")
            .bind(DEMO_SLUG)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        info!("Demo survey already seeded");
        return Ok(());
    }

    let survey_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();
    let page1 = Uuid::new_v4();
    let page2 = Uuid::new_v4();
    let page3 = Uuid::new_v4();
    let q_visit = Uuid::new_v4();
    let q_liked = Uuid::new_v4();
    let q_comment = Uuid::new_v4();
    let terminate_expr = Uuid::new_v4();

    let definition = json!({
        "pages": [
            {
                "id": page1,
                "index": 0,
                "titleTemplate": "Your visit",
                "questions": [
                    {
                        "id": q_visit,
                        "index": 0,
                        "variableName": "Visited",
                        "type": "single_choice",
                        "titleTemplate": "Did you visit us this month?",
                        "required": true,
                        "terminateIfExpressionId": terminate_expr,
                        "options": [
                            {"id": Uuid::new_v4(), "index": 0, "value": "Yes", "labelTemplate": "Yes"},
                            {"id": Uuid::new_v4(), "index": 1, "value": "No", "labelTemplate": "No"}
                        ]
                    }
                ]
            },
            {
                "id": page2,
                "index": 1,
                "titleTemplate": "What stood out",
                "questions": [
                    {
                        "id": q_liked,
                        "index": 0,
                        "variableName": "Liked",
                        "type": "multiple_choice",
                        "titleTemplate": "What did you like?",
                        "required": true,
                        "options": [
                            {"id": Uuid::new_v4(), "index": 0, "value": "Service", "labelTemplate": "Service"},
                            {"id": Uuid::new_v4(), "index": 1, "value": "Cleanliness", "labelTemplate": "Cleanliness"},
                            {"id": Uuid::new_v4(), "index": 2, "value": "Location", "labelTemplate": "Location"}
                        ]
                    }
                ]
            },
            {
                "id": page3,
                "index": 2,
                "titleTemplate": "Anything else?",
                "questions": [
                    {
                        "id": q_comment,
                        "index": 0,
                        "variableName": "Comment",
                        "type": "text_area",
                        "titleTemplate": "Tell us more about ${pipe:question:Liked:choices}",
                        "required": false,
                        "config": {"maxLength": 2000}
                    }
                ]
            }
        ],
        "expressions": [
            {
                "id": terminate_expr,
                "source": "equals(answer('Visited'), 'No')",
                "description": "did not visit"
            }
        ],
        "settings": {
            "completion": {"completionMessage": "Thanks for your feedback!"}
        }
    });

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO surveys (id, tenant_id, title, status, version, default_language, definition) \
         VALUES ($1, $2, $3, 'published', 1, 'en', $4)",
    )
    .bind(survey_id)
    .bind(tenant_id)
    .bind("Guest feedback (demo)")
    .bind(&definition)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO collectors (id, survey_id, slug, collector_type, status, settings) \
         VALUES ($1, $2, $3, 'PUBLIC', 'OPEN', '{}')",
    )
    .bind(Uuid::new_v4())
    .bind(survey_id)
    .bind(DEMO_SLUG)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(slug = DEMO_SLUG, %survey_id, "Seeded demo survey");
    Ok(())
}
