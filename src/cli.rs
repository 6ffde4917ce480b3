use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;

use crate::client::WorkflowClient;
use crate::config::Config;
use crate::db;
use crate::db::definitions::NewDefinition;
use crate::types::{
    ApprovalMetadata, AssignmentDecision, InstanceState, RejectionMetadata,
};
use crate::worker::CompletionWorker;

#[derive(Parser)]
#[command(name = "signoff")]
#[command(about = "Signoff - an approval workflow engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Run the completion event worker
    Worker {
        /// Number of concurrent event consumers (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Register a workflow definition from a JSON document file
    Register {
        /// Definition name
        name: String,

        /// Object type the definition governs (e.g. Control)
        schema_type: String,

        /// Path to the definition document JSON
        file: String,

        /// Owning organization ID
        #[arg(long)]
        owner: Option<String>,
    },

    /// Deactivate a workflow definition
    Deactivate {
        /// Definition ID to deactivate
        definition_id: String,
    },

    /// Show a workflow instance and its assignments
    Status {
        /// Instance ID to query
        instance_id: String,
    },

    /// List workflow instances
    Instances {
        /// Filter by state
        #[arg(short = 's', long = "state")]
        state: Option<String>,

        /// Number of results (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: i64,
    },

    /// List pending assignments directly targeting a user
    Pending {
        /// User ID
        user_id: String,
    },

    /// Approve an assignment (administrative; bypasses the authorization boundary)
    Approve {
        /// Assignment ID
        assignment_id: String,

        /// Acting user recorded in the approval metadata
        #[arg(long)]
        actor: String,
    },

    /// Reject an assignment (administrative; bypasses the authorization boundary)
    Reject {
        /// Assignment ID
        assignment_id: String,

        /// Acting user recorded in the rejection metadata
        #[arg(long)]
        actor: String,

        /// Rejection reason
        #[arg(long)]
        reason: Option<String>,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Apply CLI overrides to environment before any database operations
    if let Some(config_path) = &cli.config {
        env::set_var("SIGNOFF_CONFIG_PATH", config_path);
    }
    if let Some(database_url) = &cli.database_url {
        env::set_var("SIGNOFF_DATABASE_URL", database_url);
    }

    // Eagerly load and validate configuration before executing any command
    let config = Config::load()?;
    let pool = db::connect(&config.database).await?;

    match cli.command {
        Commands::Migrate => {
            db::migrate(&pool).await?;
            println!("✓ Migrations applied");
        }

        Commands::Worker { concurrency } => {
            let mut worker_config = config.worker.clone();
            if let Some(concurrency) = concurrency {
                worker_config.concurrency = concurrency;
            }

            let shutdown = tokio_util::sync::CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_token.cancel();
                }
            });

            let worker = CompletionWorker::new(pool, worker_config);
            worker.run(shutdown).await?;
        }

        Commands::Register {
            name,
            schema_type,
            file,
            owner,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read definition file {file}"))?;
            let document: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Definition file {file} is not valid JSON"))?;

            let client = WorkflowClient::new(pool);
            let definition = client
                .engine()
                .register_definition(NewDefinition {
                    name,
                    schema_type,
                    owner_id: owner,
                    document,
                    active: true,
                })
                .await?;

            println!(
                "✓ Registered definition {} (version: {})",
                definition.id,
                &definition.version_hash[..8]
            );
        }

        Commands::Deactivate { definition_id } => {
            db::definitions::set_active(&pool, &definition_id, false).await?;
            println!("✓ Definition {} deactivated", definition_id);
        }

        Commands::Status { instance_id } => {
            let client = WorkflowClient::new(pool);

            match client.get_instance(&instance_id).await? {
                Some(instance) => {
                    println!("Instance: {}", instance.id);
                    match client.get_definition(&instance.workflow_definition_id).await? {
                        Some(def) => println!("Definition: {} ({})", def.name, def.id),
                        None => println!("Definition: {}", instance.workflow_definition_id),
                    }
                    if let Some(object) = client.instance_object(&instance.id).await? {
                        println!("Object: {} {}", object.object_type, object.object_id);
                    }
                    println!("State: {:?}", instance.state);
                    println!("Action index: {}", instance.current_action_index);
                    println!("Created: {}", instance.created_at);

                    if let Some(completed_at) = instance.completed_at {
                        println!("Completed: {}", completed_at);
                    }

                    let assignments = client.instance_assignments(&instance.id).await?;
                    if !assignments.is_empty() {
                        println!("\nAssignments:");
                        for assignment in assignments {
                            println!(
                                "  {} | {} | {:?} {} | {:?}",
                                assignment.id,
                                assignment.assignment_key,
                                assignment.target_kind,
                                assignment.target_id,
                                assignment.status
                            );
                        }
                    }
                }
                None => {
                    eprintln!("Instance {} not found", instance_id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Instances { state, limit } => {
            let state_filter = match state.as_deref() {
                None => None,
                Some("running") => Some(InstanceState::Running),
                Some("completed") => Some(InstanceState::Completed),
                Some("failed") => Some(InstanceState::Failed),
                Some(other) => {
                    eprintln!(
                        "Invalid state: {}. Must be one of: running, completed, failed",
                        other
                    );
                    std::process::exit(1);
                }
            };

            let instances = db::instances::list_instances(&pool, state_filter, limit).await?;

            if instances.is_empty() {
                println!("No instances found");
                return Ok(());
            }

            println!("Found {} instance(s):\n", instances.len());
            for instance in instances {
                println!(
                    "  {} | {:?} | action {} | {}",
                    instance.id,
                    instance.state,
                    instance.current_action_index,
                    instance.workflow_definition_id
                );
            }
        }

        Commands::Pending { user_id } => {
            let assignments = db::assignments::list_pending_for_user(&pool, &user_id).await?;

            if assignments.is_empty() {
                println!("No pending assignments for {}", user_id);
                return Ok(());
            }

            for assignment in assignments {
                println!(
                    "  {} | {} | instance {}",
                    assignment.id, assignment.assignment_key, assignment.workflow_instance_id
                );
            }
        }

        Commands::Approve {
            assignment_id,
            actor,
        } => {
            let client = WorkflowClient::new(pool);
            let assignment = client.get_assignment(&assignment_id).await?;

            let assignment = client
                .engine()
                .complete_assignment(
                    &assignment_id,
                    AssignmentDecision::Approved(ApprovalMetadata {
                        approved_at: chrono::Utc::now(),
                        approved_by_user_id: actor,
                        label: assignment.and_then(|a| a.label),
                    }),
                )
                .await?;

            println!("✓ Assignment {} approved", assignment.id);
        }

        Commands::Reject {
            assignment_id,
            actor,
            reason,
        } => {
            let client = WorkflowClient::new(pool);
            let assignment = client
                .engine()
                .complete_assignment(
                    &assignment_id,
                    AssignmentDecision::Rejected(RejectionMetadata {
                        rejected_at: chrono::Utc::now(),
                        rejected_by_user_id: actor,
                        rejection_reason: reason,
                    }),
                )
                .await?;

            println!("✓ Assignment {} rejected", assignment.id);
        }
    }

    Ok(())
}
