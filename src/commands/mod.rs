use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use common::{Configuration, TenantId};
use std::io::{BufRead, Write};
use sweeper::operations::{self, ConfirmationPrompt, Operation, Outcome};
use sweeper::{LiveConnector, SweepError, WildcardPattern};

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Delete metric data and index metadata per tenant or wildcard pattern
#[derive(Parser, Debug)]
#[command(name = "metricsweep", version, about)]
pub struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Contact points; they override the configuration file and environment.
#[derive(Args, Debug, Clone, Default)]
struct Endpoints {
    /// Storage contact point
    #[arg(short = 'c', long = "storage")]
    storage: Option<String>,

    /// Index contact point
    #[arg(short = 'e', long = "index")]
    index: Option<String>,
}

impl Endpoints {
    fn apply(self, config: &mut Configuration) {
        if let Some(storage) = self.storage {
            config.storage.contact_point = Some(storage);
        }
        if let Some(index) = self.index {
            config.index.contact_point = Some(index);
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remove every index document and all stored data of a tenant
    RemoveTenant {
        #[command(flatten)]
        endpoints: Endpoints,

        /// Tenant to remove
        #[arg(short, long)]
        tenant: TenantId,
    },
    /// Delete the metrics of a tenant matching a wildcard pattern
    DeleteMetrics {
        #[command(flatten)]
        endpoints: Endpoints,

        /// Tenant owning the metrics
        #[arg(short, long)]
        tenant: TenantId,

        /// Pattern such as `app.*.latency` or `{web,db}.cpu`
        #[arg(short, long)]
        wildcard: WildcardPattern,

        /// Print matching paths instead of deleting them
        #[arg(long)]
        dry_run: bool,
    },
}

impl Commands {
    fn into_operation(self, config: &mut Configuration) -> Operation {
        match self {
            Commands::RemoveTenant { endpoints, tenant } => {
                endpoints.apply(config);
                Operation::RemoveTenant { tenant }
            }
            Commands::DeleteMetrics {
                endpoints,
                tenant,
                wildcard,
                dry_run,
            } => {
                endpoints.apply(config);
                Operation::DeleteMetrics {
                    tenant,
                    pattern: wildcard,
                    dry_run,
                }
            }
        }
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        utils::init_logging(&self.common);
        log::debug!("{}", utils::version_info());

        let mut config = utils::load_config(self.common.config.as_ref())?;
        let operation = self.command.into_operation(&mut config);
        let connector = LiveConnector::new(config.clone());

        let outcome = operations::run(
            &operation,
            &config,
            &connector,
            confirm_on_terminal,
            &mut std::io::stdout(),
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(SweepError::InvalidArgument(message)) => {
                return Err(Cli::command()
                    .error(ErrorKind::MissingRequiredArgument, message)
                    .into());
            }
            Err(e) => {
                if let Some(processed) = deleted_before_abort(&operation, &e) {
                    log::error!("Aborted after {processed} metrics were deleted");
                }
                return Err(anyhow::Error::new(e).context("Operation failed"));
            }
        };

        match outcome {
            Outcome::Declined => {
                println!("Operation cancelled");
                return Ok(());
            }
            Outcome::Previewed { matched } => {
                log::debug!("Dry run matched {matched} metrics");
            }
            Outcome::MetricsDeleted(report) => {
                log::info!(
                    "Deleted {} metrics over {} pages in {} ms",
                    report.processed,
                    report.pages,
                    report.duration_ms
                );
            }
            Outcome::TenantRemoved(report) => {
                log::info!(
                    "Removed tenant {} ({} index documents, namespace {})",
                    report.tenant,
                    report.index_documents_deleted,
                    report.namespace
                );
            }
        }

        log::info!("All done");
        Ok(())
    }
}

/// Progress worth reporting when `operation` failed with `error`. Only a
/// pattern deletion counts metrics.
fn deleted_before_abort(operation: &Operation, error: &SweepError) -> Option<u64> {
    match operation {
        Operation::DeleteMetrics { dry_run: false, .. } => error.processed(),
        _ => None,
    }
}

fn confirm_on_terminal(prompt: &ConfirmationPrompt) -> bool {
    let stdin = std::io::stdin();
    read_confirmation(prompt, stdin.lock(), std::io::stdout())
}

/// Show `prompt` in red and compare one line of `input` against it.
fn read_confirmation<R: BufRead, W: Write>(
    prompt: &ConfirmationPrompt,
    mut input: R,
    mut output: W,
) -> bool {
    if writeln!(output, "{RED}{}{RESET}", prompt.message)
        .and_then(|_| output.flush())
        .is_err()
    {
        return false;
    }

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => prompt.accepts(answer.trim_end_matches(['\r', '\n'])),
        Err(e) => {
            log::warn!("Failed to read confirmation: {e}");
            false
        }
    }
}
