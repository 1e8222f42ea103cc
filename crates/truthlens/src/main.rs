use std::io::{Read as _, Write as _};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use truthlens_detect::{
    analyze, credentials_path, parse_predictions, parse_response_value, probe_endpoint,
    resolve_token, sha256_hex, store_token, Analysis, DetectorClient, ImageFile, Prediction,
    DEFAULT_ENDPOINT,
};

const CHECK_SCHEMA_VERSION: &str = "truthlens.check@0.1.0";
const AUTH_LOGIN_SCHEMA_VERSION: &str = "truthlens.auth.login@0.1.0";
const AUTH_STATUS_SCHEMA_VERSION: &str = "truthlens.auth.status@0.1.0";
const DOCTOR_SCHEMA_VERSION: &str = "truthlens.doctor.report@0.1.0";

#[derive(Debug, Parser)]
#[command(name = "truthlens")]
#[command(about = "AI-generated image detection via a hosted classifier.", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long, global = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Check(CheckArgs),
    Auth(AuthArgs),
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    image: PathBuf,

    /// Print the parsed API response instead of the verdict.
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Args)]
struct AuthArgs {
    #[command(subcommand)]
    cmd: AuthCmd,
}

#[derive(Debug, Subcommand)]
enum AuthCmd {
    Login,
    Status,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    #[arg(long)]
    network: bool,
}

#[derive(Debug)]
struct Reporter {
    json: bool,
    quiet: bool,
}

impl Reporter {
    fn progress(&self, msg: &str) {
        if self.json || self.quiet {
            return;
        }
        eprintln!("{msg}");
    }
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    let reporter = Reporter {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.cmd {
        Command::Check(args) => cmd_check(&cli.endpoint, cli.token.as_deref(), args, &reporter),
        Command::Auth(args) => cmd_auth(&cli.endpoint, cli.token.as_deref(), args, &reporter),
        Command::Doctor(args) => cmd_doctor(&cli.endpoint, cli.token.as_deref(), args, &reporter),
    }
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    schema_version: &'static str,
    ok: bool,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    predictions: Vec<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

fn check_error(
    image: &std::path::Path,
    code: &str,
    message: String,
    hint: Option<String>,
) -> CheckReport {
    CheckReport {
        schema_version: CHECK_SCHEMA_VERSION,
        ok: false,
        image: image.display().to_string(),
        sha256: None,
        size_bytes: None,
        content_type: None,
        predictions: Vec::new(),
        analysis: None,
        error: Some(ErrorReport {
            code: code.to_string(),
            message,
            hint,
        }),
    }
}

fn cmd_check(
    endpoint: &str,
    token_flag: Option<&str>,
    args: CheckArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let Some(resolved) = resolve_token(token_flag, endpoint)? else {
        return report_check(
            reporter,
            check_error(
                &args.image,
                "TOKEN_MISSING",
                "no API token configured".to_string(),
                Some("set HF_TOKEN or run: truthlens auth login".to_string()),
            ),
        );
    };

    reporter.progress(&format!("reading image: {}", args.image.display()));
    let image = match ImageFile::read(&args.image) {
        Ok(image) => image,
        Err(err) => {
            return report_check(
                reporter,
                check_error(&args.image, "IMAGE_READ", format!("{err:#}"), None),
            )
        }
    };
    reporter.progress(&format!("image size: {} bytes", image.bytes.len()));
    let digest = sha256_hex(&image.bytes);

    let client = match DetectorClient::from_endpoint(endpoint, Some(resolved.token)) {
        Ok(client) => client,
        Err(err) => {
            return report_check(
                reporter,
                check_error(&args.image, "ENDPOINT_INVALID", format!("{err:#}"), None),
            )
        }
    };
    reporter.progress(&format!("POST {}", client.endpoint()));

    let body = match client.post_image(&image) {
        Ok(body) => body,
        Err(err) => {
            return report_check(
                reporter,
                check_error(&args.image, "HTTP", format!("{err:#}"), None),
            )
        }
    };

    if args.raw {
        let doc = match parse_response_value(&body) {
            Ok(doc) => doc,
            Err(err) => {
                return report_check(
                    reporter,
                    check_error(&args.image, "PARSE", format!("{err:#}"), None),
                )
            }
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let predictions = match parse_predictions(&body) {
        Ok(predictions) => predictions,
        Err(err) => {
            return report_check(
                reporter,
                check_error(&args.image, "PARSE", format!("{err:#}"), None),
            )
        }
    };
    let analysis = match analyze(&predictions) {
        Ok(analysis) => analysis,
        Err(err) => {
            return report_check(
                reporter,
                check_error(&args.image, "PARSE", format!("{err:#}"), None),
            )
        }
    };

    if reporter.json {
        return report_check(
            reporter,
            CheckReport {
                schema_version: CHECK_SCHEMA_VERSION,
                ok: true,
                image: args.image.display().to_string(),
                sha256: Some(digest),
                size_bytes: Some(image.bytes.len() as u64),
                content_type: Some(image.content_type().to_string()),
                predictions,
                analysis: Some(analysis),
                error: None,
            },
        );
    }

    if analysis.authentic {
        println!(
            "likely authentic ({}: {:.2}% AI-generated)",
            analysis.label,
            analysis.ai_probability * 100.0
        );
    } else {
        println!(
            "likely AI-generated ({}: {:.2}%)",
            analysis.label,
            analysis.ai_probability * 100.0
        );
    }
    for p in &predictions {
        println!("  {}: {:.4}", p.label, p.score);
    }
    println!("sha256: {digest}");
    Ok(std::process::ExitCode::SUCCESS)
}

fn report_check(reporter: &Reporter, report: CheckReport) -> Result<std::process::ExitCode> {
    if !reporter.json {
        if let Some(err) = &report.error {
            println!("error: {}: {}", err.code, err.message);
            if let Some(hint) = &err.hint {
                println!("hint: {hint}");
            }
        }
        return Ok(if report.ok {
            std::process::ExitCode::SUCCESS
        } else {
            std::process::ExitCode::from(1)
        });
    }
    write_json_stdout(&report)?;
    Ok(if report.ok {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::from(1)
    })
}

fn cmd_auth(
    endpoint: &str,
    token_flag: Option<&str>,
    args: AuthArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    match args.cmd {
        AuthCmd::Login => cmd_auth_login(endpoint, reporter),
        AuthCmd::Status => cmd_auth_status(endpoint, token_flag, reporter),
    }
}

fn cmd_auth_login(endpoint: &str, reporter: &Reporter) -> Result<std::process::ExitCode> {
    reporter.progress("paste token, then EOF (ctrl-d):");
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read token from stdin")?;
    let token = input.trim();
    if token.is_empty() {
        anyhow::bail!("token must be non-empty");
    }
    store_token(endpoint, token)?;
    let path = credentials_path()?;
    reporter.progress(&format!("ok: token stored in {}", path.display()));

    if reporter.json {
        #[derive(Serialize)]
        struct AuthLoginReport {
            schema_version: &'static str,
            ok: bool,
            endpoint: String,
            credentials: String,
        }
        write_json_stdout(&AuthLoginReport {
            schema_version: AUTH_LOGIN_SCHEMA_VERSION,
            ok: true,
            endpoint: endpoint.to_string(),
            credentials: path.display().to_string(),
        })?;
    }
    Ok(std::process::ExitCode::SUCCESS)
}

fn cmd_auth_status(
    endpoint: &str,
    token_flag: Option<&str>,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let resolved = resolve_token(token_flag, endpoint)?;
    let path = credentials_path()?;

    if reporter.json {
        #[derive(Serialize)]
        struct AuthStatusReport {
            schema_version: &'static str,
            ok: bool,
            endpoint: String,
            token_configured: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            source: Option<String>,
            credentials: String,
        }
        write_json_stdout(&AuthStatusReport {
            schema_version: AUTH_STATUS_SCHEMA_VERSION,
            ok: true,
            endpoint: endpoint.to_string(),
            token_configured: resolved.is_some(),
            source: resolved.map(|r| r.source.to_string()),
            credentials: path.display().to_string(),
        })?;
        return Ok(std::process::ExitCode::SUCCESS);
    }

    match resolved {
        Some(r) => println!("token: {}", r.source),
        None => {
            println!("token: none");
            println!("hint: set HF_TOKEN or run: truthlens auth login");
        }
    }
    println!("credentials: {}", path.display());
    Ok(std::process::ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    schema_version: &'static str,
    ok: bool,
    endpoint: String,
    checks: Vec<DoctorCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn cmd_doctor(
    endpoint: &str,
    token_flag: Option<&str>,
    args: DoctorArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let mut checks: Vec<DoctorCheck> = Vec::new();
    let mut suggestions: Vec<String> = Vec::new();

    let endpoint_ok = match DetectorClient::from_endpoint(endpoint, None) {
        Ok(client) => {
            checks.push(DoctorCheck {
                name: "endpoint_url".to_string(),
                ok: true,
                detail: Some(client.endpoint().to_string()),
            });
            true
        }
        Err(err) => {
            checks.push(DoctorCheck {
                name: "endpoint_url".to_string(),
                ok: false,
                detail: Some(format!("{err:#}")),
            });
            false
        }
    };

    match resolve_token(token_flag, endpoint) {
        Ok(Some(resolved)) => checks.push(DoctorCheck {
            name: "token".to_string(),
            ok: true,
            detail: Some(resolved.source.to_string()),
        }),
        Ok(None) => {
            checks.push(DoctorCheck {
                name: "token".to_string(),
                ok: false,
                detail: Some("no token configured".to_string()),
            });
            suggestions.push("Set HF_TOKEN or run: truthlens auth login".to_string());
        }
        Err(err) => checks.push(DoctorCheck {
            name: "token".to_string(),
            ok: false,
            detail: Some(format!("{err:#}")),
        }),
    }

    let creds = credentials_path()?;
    if creds.is_file() {
        let parses = std::fs::read(&creds)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| {
                serde_json::from_slice::<serde_json::Value>(&bytes).map_err(anyhow::Error::from)
            });
        checks.push(DoctorCheck {
            name: "credentials_file".to_string(),
            ok: parses.is_ok(),
            detail: Some(match parses {
                Ok(_) => creds.display().to_string(),
                Err(err) => format!("{}: {err:#}", creds.display()),
            }),
        });
    } else {
        checks.push(DoctorCheck {
            name: "credentials_file".to_string(),
            ok: true,
            detail: Some(format!("absent: {}", creds.display())),
        });
    }

    if args.network && endpoint_ok {
        match probe_endpoint(endpoint) {
            Ok(status) => checks.push(DoctorCheck {
                name: "endpoint_reachable".to_string(),
                ok: true,
                detail: Some(format!("HTTP {status}")),
            }),
            Err(err) => {
                checks.push(DoctorCheck {
                    name: "endpoint_reachable".to_string(),
                    ok: false,
                    detail: Some(format!("{err:#}")),
                });
                suggestions.push("Check network access to the inference endpoint".to_string());
            }
        }
    }

    let ok = checks.iter().all(|c| c.ok);
    let report = DoctorReport {
        schema_version: DOCTOR_SCHEMA_VERSION,
        ok,
        endpoint: endpoint.to_string(),
        checks,
        suggestions,
    };

    if reporter.json {
        write_json_stdout(&report)?;
    } else if ok {
        println!("ok: truthlens doctor");
    } else {
        println!("error: truthlens doctor found problems");
        for check in report.checks.iter().filter(|c| !c.ok) {
            println!("  {}: {}", check.name, check.detail.as_deref().unwrap_or(""));
        }
        for s in &report.suggestions {
            println!("hint: {s}");
        }
    }
    Ok(if ok {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::from(1)
    })
}

fn write_json_stdout<T: Serialize>(v: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(v)?;
    bytes.push(b'\n');
    std::io::stdout()
        .write_all(&bytes)
        .context("write stdout")?;
    Ok(())
}
