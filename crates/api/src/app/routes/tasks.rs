//! Task and job lifecycle endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use jobba_core::{Job, JobOptions};

use crate::app::dto::{self, ProgressRequest, ScheduleRequest, ScheduleResponse, StateResponse, TaskSummary};
use crate::app::errors;
use crate::context::RequestContext;
use crate::route::Route;

type HandlerResult = Result<Response, Response>;

pub fn routes() -> Vec<Route> {
    vec![
        Route::get("/tasks", list_tasks).describe("Lists registered tasks with job counts."),
        Route::post("/tasks/:task", schedule).describe("Schedules a job: {data, options?}."),
        Route::get("/tasks/:task/jobs", list_jobs)
            .describe("Lists jobs of a task; ?status=&limit= filter the list."),
        Route::get("/tasks/:task/jobs/:job_id", get_job).describe("Shows one job."),
        Route::get("/tasks/:task/jobs/:job_id/state", get_state)
            .describe("Shows the lifecycle state of a job."),
        Route::put("/tasks/:task/jobs/:job_id/progress", set_progress)
            .describe("Reports job progress: {progress}."),
        Route::post("/tasks/:task/jobs/:job_id/retry", retry).describe("Retries a failed job."),
        Route::post("/tasks/:task/jobs/:job_id/promote", promote)
            .describe("Moves a delayed job to the waiting list."),
        Route::post("/tasks/:task/jobs/:job_id/discard", discard)
            .describe("Prevents further retries of a job."),
        Route::delete("/tasks/:task/jobs/:job_id", remove).describe("Removes a job."),
    ]
}

async fn list_tasks(ctx: RequestContext) -> HandlerResult {
    let mut tasks = Vec::new();
    for id in ctx.tasks.task_ids() {
        let counts = ctx
            .tasks
            .counts(&id)
            .await
            .map_err(errors::registry_error_to_response)?;
        tasks.push(TaskSummary { id, counts });
    }
    Ok(Json(tasks).into_response())
}

async fn schedule(ctx: RequestContext) -> HandlerResult {
    let task = task_param(&ctx);
    let req: ScheduleRequest = ctx.body_as()?;
    let options = req.options.map(JobOptions::from);

    let job_id = ctx
        .tasks
        .schedule(task, req.data, options)
        .await
        .map_err(errors::registry_error_to_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduleResponse {
            task: task.to_string(),
            job_id,
        }),
    )
        .into_response())
}

async fn list_jobs(ctx: RequestContext) -> HandlerResult {
    let status = ctx.query("status").map(dto::parse_status).transpose()?;
    let limit = dto::parse_limit(ctx.query("limit"))?;

    let jobs = ctx
        .tasks
        .jobs(task_param(&ctx), status, limit)
        .await
        .map_err(errors::registry_error_to_response)?;
    Ok(Json(jobs).into_response())
}

async fn get_job(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    let info = job.details().await.map_err(errors::engine_error_to_response)?;
    Ok(Json(info).into_response())
}

async fn get_state(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    let state = job.get_state().await.map_err(errors::engine_error_to_response)?;
    Ok(Json(StateResponse { state }).into_response())
}

async fn set_progress(ctx: RequestContext) -> HandlerResult {
    let req: ProgressRequest = ctx.body_as()?;
    let job = load_job(&ctx).await?;
    job.progress(req.progress)
        .await
        .map_err(errors::engine_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn retry(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    job.retry().await.map_err(errors::engine_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn promote(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    job.promote().await.map_err(errors::engine_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn discard(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    job.discard().await.map_err(errors::engine_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn remove(ctx: RequestContext) -> HandlerResult {
    let job = load_job(&ctx).await?;
    job.remove().await.map_err(errors::engine_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn task_param(ctx: &RequestContext) -> &str {
    ctx.param("task").unwrap_or_default()
}

async fn load_job(ctx: &RequestContext) -> Result<Job, Response> {
    let job_id = dto::parse_job_id(ctx.param("job_id").unwrap_or_default())?;

    match ctx.tasks.job(task_param(ctx), job_id).await {
        Ok(Some(job)) => Ok(job),
        Ok(None) => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "job_not_found",
            format!("job not found: {job_id}"),
        )),
        Err(e) => Err(errors::registry_error_to_response(e)),
    }
}
