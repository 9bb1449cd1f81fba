use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trawler API",
        version = "0.1.0",
        description = "Enqueue scrape jobs for the trawler worker fleet."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::create_batch,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::JobRequest,
        crate::dto::BatchRequest,
        crate::dto::EnqueuedJobResponse,
        crate::dto::FailedJobResponse,
        crate::dto::BatchResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Job submission"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the bearer scheme referenced by the `/v1` paths.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .description(Some("Set via the TRAWLER_API_KEY environment variable."))
                        .build(),
                ),
            );
        }
    }
}
