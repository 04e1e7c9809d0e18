use std::env;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rust_form_manager::executor::{IterationResult, SessionExecutor, VirtualUser};
use rust_form_manager::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use rust_form_manager::yaml_config::YamlConfig;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Usage: rust_form_manager <plan.yaml>");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  FORM_PLAN                         - Plan file, used when no argument is given");
    eprintln!("  LOG_FORMAT                        - 'json' for JSON logs (default: text)");
    eprintln!("  RUST_LOG                          - Log filter (default: info)");
    eprintln!("  METRICS_PORT                      - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE                  - Prometheus metric namespace (default: form_manager)");
    eprintln!();
    eprintln!("Form manager overrides (take precedence over the plan file):");
    eprintln!("  FORMMAN_CONTENT_TYPE              - Content-type prefix of form pages (default: text/html)");
    eprintln!("  FORMMAN_CLEAR_EACH_ITERATION      - true/false (default: true)");
    eprintln!("  FORMMAN_MATCH_SAMPLER_URL         - true/false (default: true)");
    eprintln!("  FORMMAN_MATCH_SAMPLER_PARAMETERS  - true/false (default: false)");
    eprintln!("  FORMMAN_MATCH_SUBMIT              - true/false (default: false)");
    eprintln!("  FORMMAN_MATCH_CSS_SELECTOR        - CSS selector the form must match (default: none)");
    eprintln!("  FORMMAN_COPY_PARAMETERS           - true/false (default: true)");
    eprintln!("  FORMMAN_COPY_URL                  - true/false (default: false)");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn report(result: &IterationResult) {
    for step in &result.steps {
        let line = serde_json::json!({
            "user": result.user_id,
            "iteration": result.iteration,
            "step": step.step_name,
            "path": step.path,
            "status": step.status_code,
            "success": step.success,
            "responseTimeMs": step.response_time_ms,
            "form": step.form_outcome,
            "arguments": step
                .arguments
                .iter()
                .map(|a| serde_json::json!({ "name": a.name, "value": a.value }))
                .collect::<Vec<_>>(),
            "error": step.error,
        });
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let plan_path = match env::args().nth(1).or_else(|| env::var("FORM_PLAN").ok()) {
        Some(path) => path,
        None => {
            print_config_help();
            std::process::exit(1);
        }
    };

    let plan = match YamlConfig::from_file(&plan_path) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };
    let form_config = plan.form_manager_config();
    if let Err(e) = form_config.validate() {
        eprintln!("Configuration error: {}\n", e);
        std::process::exit(1);
    }

    init_tracing();
    register_metrics()?;

    if let Ok(port) = env::var("METRICS_PORT") {
        let port: u16 = port.parse()?;
        let registry = prometheus::default_registry().clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    println!("Starting form replay:");
    println!("  Plan: {}", plan_path);
    println!("  Base URL: {}", plan.config.base_url);
    println!("  Users: {}", plan.config.users);
    println!("  Iterations per user: {}", plan.config.iterations);
    form_config.print_summary();

    let steps = plan.to_steps();
    let timeout: Duration = plan.timeout()?;

    let mut handles = Vec::with_capacity(plan.config.users);
    for id in 0..plan.config.users {
        let steps = steps.clone();
        let base_url = plan.config.base_url.clone();
        let iterations = plan.config.iterations;
        let mut user = VirtualUser::new(id, form_config.clone())?;

        // Own client per user, so cookie jars stay apart
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        handles.push(tokio::spawn(async move {
            let executor = SessionExecutor::new(base_url, client);
            let mut failed = 0usize;
            for _ in 0..iterations {
                let result = executor.run_iteration(&steps, &mut user).await;
                report(&result);
                if !result.success {
                    failed += 1;
                }
            }
            (user.id, failed)
        }));
    }

    let mut failed_iterations = 0;
    for handle in handles {
        match handle.await {
            Ok((user_id, failed)) => {
                info!(user = user_id, failed_iterations = failed, "User finished");
                failed_iterations += failed;
            }
            Err(e) => error!(error = %e, "User task panicked"),
        }
    }

    println!(
        "Replay finished: {} of {} iterations failed",
        failed_iterations,
        plan.config.users * plan.config.iterations
    );

    let final_metrics_output = gather_metrics_string(prometheus::default_registry());
    println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
    println!("--- END OF FINAL METRICS ---");

    if failed_iterations > 0 {
        std::process::exit(2);
    }
    Ok(())
}
