// CLI commands: judge local files with the same engine the API uses
use anyhow::{bail, Context, Result};
use quizrun_common::types::{OutcomeStatus, TestCase};
use quizrun_engine::toolchain::{SourceNaming, Toolchain};
use quizrun_engine::{CancelToken, EngineConfig, JobCoordinator, JobError};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn coordinator(timeout_ms: Option<u64>) -> Result<JobCoordinator> {
    let mut config = EngineConfig::from_env()?;
    if let Some(ms) = timeout_ms {
        if ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        config.run_timeout = Duration::from_millis(ms);
    }
    JobCoordinator::from_config(&config)
}

/// Ctrl-C stops the job before its next step instead of killing the CLI
/// mid-write, so the workspace is still released.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted, cancelling...");
            handle.cancel();
        }
    });
    token
}

/// Load a JSON array of test cases
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Print job-level failures the way a user wants to read them
fn report_job_error(err: JobError) -> anyhow::Error {
    if let JobError::Compile { details } = &err {
        eprintln!("❌ Compilation error\n");
        eprintln!("{}", details);
    } else {
        eprintln!("❌ {}", err);
    }
    err.into()
}

pub async fn run_tests(
    lang: &str,
    file: &Path,
    tests: &Path,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let code = read_source(file)?;
    let cases = load_test_cases(tests)?;
    let coordinator = coordinator(timeout_ms)?;

    println!(
        "🚀 Judging {} against {} test case(s) [{} backend]",
        file.display(),
        cases.len(),
        coordinator.backend()
    );

    let result = coordinator
        .run_tests(&code, lang, cases, &cancel_on_ctrl_c())
        .await
        .map_err(report_job_error)?;

    println!();
    for (idx, outcome) in result.outcomes.iter().enumerate() {
        let mark = match outcome.status {
            OutcomeStatus::Pass => "✅ pass ",
            OutcomeStatus::Fail => "❌ fail ",
            OutcomeStatus::Error => "💥 error",
        };
        println!(
            "  #{:<3} {} {:>6} ms",
            idx + 1,
            mark,
            outcome.execution_time_ms
        );
        if outcome.status != OutcomeStatus::Pass {
            println!("        expected: {:?}", outcome.expected.trim());
            println!("        actual:   {:?}", outcome.actual_output);
        }
        if let Some(error) = &outcome.error {
            for line in error.lines().take(5) {
                println!("        | {}", line);
            }
        }
    }

    println!(
        "\n📊 Score: {} ({}/{} passed)",
        result.score, result.passed_count, result.total
    );
    if !result.success {
        bail!("{} test case(s) did not pass", result.total - result.passed_count);
    }
    Ok(())
}

pub async fn run_custom(
    lang: &str,
    file: &Path,
    input: Option<String>,
    input_file: Option<&Path>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let code = read_source(file)?;
    let stdin = match (input, input_file) {
        (Some(inline), _) => inline,
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => String::new(),
    };
    let coordinator = coordinator(timeout_ms)?;

    let output = coordinator
        .run_custom(&code, lang, &stdin, &cancel_on_ctrl_c())
        .await
        .map_err(report_job_error)?;

    match (output.output, output.error) {
        (Some(stdout), _) => {
            println!("{}", stdout);
            eprintln!("⏱️  {} ms", output.execution_time_ms);
            Ok(())
        }
        (None, Some(error)) => {
            eprintln!("💥 Runtime error\n");
            eprintln!("{}", error);
            bail!("Program failed")
        }
        (None, None) => bail!("Program produced neither output nor an error"),
    }
}

fn describe_source(toolchain: &Toolchain) -> String {
    match toolchain.source {
        SourceNaming::Extension(ext) => format!("<id>.{}", ext),
        SourceNaming::Fixed(name) => name.to_string(),
    }
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    println!(
        "{:<12} {:<12} {:<34} {:<24}",
        "NAME", "SOURCE", "COMPILE", "RUN"
    );
    println!("{}", "─".repeat(84));

    for toolchain in Toolchain::all() {
        let id = "<id>";
        let compile = toolchain
            .compile_command(id)
            .map(|cmd| cmd.to_vec().join(" "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<12} {:<34} {:<24}",
            toolchain.language.as_str(),
            describe_source(toolchain),
            compile,
            toolchain.run_command(id).to_vec().join(" ")
        );
    }

    println!("\n✅ Total: {} language(s)", Toolchain::all().len());
}
