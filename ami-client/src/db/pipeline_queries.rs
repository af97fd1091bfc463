use sqlx::PgPool;

use super::{ObjectName, QueryError};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PipelineDefinition {
    pub name: String,
    pub definition: String,
}

fn split_scope(scope: &str) -> Result<(Option<String>, String), QueryError> {
    // A scope is `SCHEMA` or `DB.SCHEMA`; reuse the object-name rules.
    let parsed = ObjectName::parse(scope)?;
    if parsed.database.is_some() {
        return Err(QueryError::InvalidIdentifier(scope.to_string()));
    }
    Ok((parsed.schema, parsed.name))
}

/// All ingestion pipelines in a schema together with their definitions.
pub async fn list_pipelines(pool: &PgPool, scope: &str) -> Result<Vec<PipelineDefinition>, QueryError> {
    let (database, schema) = split_scope(scope)?;

    let rows = sqlx::query_as::<_, PipelineDefinition>(
        r#"
        SELECT
            pipe_catalog || '.' || pipe_schema || '.' || pipe_name AS name,
            definition
        FROM information_schema.pipes
        WHERE UPPER(pipe_schema) = UPPER($1)
          AND ($2::TEXT IS NULL OR UPPER(pipe_catalog) = UPPER($2))
        ORDER BY pipe_name
        "#,
    )
    .bind(schema)
    .bind(database)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Ask a pipeline to scan its source location for files it has not loaded.
pub async fn refresh_pipeline(pool: &PgPool, name: &str) -> Result<(), QueryError> {
    let name = ObjectName::parse(name)?;
    sqlx::query(&format!("ALTER PIPE {name} REFRESH"))
        .execute(pool)
        .await?;
    Ok(())
}

/// Storage URL behind an externally registered stage, if it has one.
pub async fn stage_url(pool: &PgPool, stage: &str) -> Result<Option<String>, QueryError> {
    let stage = ObjectName::parse(stage)?;

    let url: Option<Option<String>> = sqlx::query_scalar(
        r#"
        SELECT stage_url
        FROM information_schema.stages
        WHERE UPPER(stage_name) = UPPER($1)
          AND ($2::TEXT IS NULL OR UPPER(stage_schema) = UPPER($2))
          AND ($3::TEXT IS NULL OR UPPER(stage_catalog) = UPPER($3))
        LIMIT 1
        "#,
    )
    .bind(&stage.name)
    .bind(&stage.schema)
    .bind(&stage.database)
    .fetch_optional(pool)
    .await?;

    Ok(url.flatten())
}
