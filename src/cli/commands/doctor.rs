//! Doctor Command
//!
//! Checks every enabled backend concurrently and prints the routing table of
//! the active branch with the availability of each candidate.

use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use crate::ai::{Router, Task};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::types::Result;

#[derive(Debug, Serialize)]
pub struct BackendCheck {
    pub name: String,
    pub kind: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct RouteRow {
    pub task: Task,
    pub candidates: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub branch: String,
    pub backends: Vec<BackendCheck>,
    pub routes: Vec<RouteRow>,
}

impl DoctorReport {
    pub fn healthy(&self) -> bool {
        self.backends.iter().all(|b| b.available)
    }
}

/// Check backends and record results in the router's health cache
pub async fn diagnose(router: &Router, branch: crate::ai::Branch) -> DoctorReport {
    let checks = router.registry().iter().map(|backend| async move {
        let available = backend.health_check().await;
        router.health().record(backend.name(), available);
        BackendCheck {
            name: backend.name().to_string(),
            kind: backend.kind().to_string(),
            available,
        }
    });
    let backends = join_all(checks).await;
    debug!(health = %router.health().stats().summary(), "Backends checked");

    let routes = Task::ALL
        .into_iter()
        .map(|task| RouteRow {
            task,
            candidates: router
                .routing()
                .candidates(task, branch)
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
        .collect();

    DoctorReport {
        branch: branch.to_string(),
        backends,
        routes,
    }
}

/// Returns whether every backend answered
pub async fn run(ctx: &CommandContext, format: OutputFormat) -> Result<bool> {
    let router = ctx.config.build_router()?;
    let report = diagnose(&router, ctx.config.branch).await;

    if format == OutputFormat::Json {
        print_json(&report)?;
        return Ok(report.healthy());
    }

    let out = Output::new();
    out.header(&format!("Branch: {}", report.branch));

    out.section("Backends");
    for check in &report.backends {
        out.check(check.available, &format!("{} ({})", check.name, check.kind));
    }

    out.section("Routing");
    for row in &report.routes {
        out.field(row.task.config_key(), row.candidates.join(" → "));
    }

    println!();
    if report.healthy() {
        out.success("All backends reachable");
    } else {
        out.warning("Some backends are unreachable; routing will fall back");
    }
    Ok(report.healthy())
}
