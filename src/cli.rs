use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use facility_booking::config::Config;
use facility_booking::error::{Error, Result};
use facility_booking::state::{
    Balance, Booking, BookingStatus, BookingType, MachineStatus, Role, TokenTransaction,
};
use facility_booking::storage::FileStorage;
use facility_booking::tx::{BookingRequest, Command, CommandKind};
use facility_booking::BookingEngine;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facility-booking")]
#[command(about = "Facility booking CLI - machine reservations and token ledger")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long, global = true)]
    pub format: Option<String>,

    /// Data directory path
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// Identity the command runs as
    #[arg(short, long, global = true)]
    pub actor: Option<String>,

    /// Emit JSON log lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage machines
    Machine {
        #[command(subcommand)]
        command: MachineCommands,
    },

    /// Grant, correct or expire tokens
    Tokens {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Request a booking
    Book(BookArgs),

    /// Approve a pending booking (charges tokens)
    Approve { booking_id: String },

    /// Reject a pending booking
    Reject { booking_id: String },

    /// Cancel a booking (refunds if it was approved)
    Cancel { booking_id: String },

    /// Show a user's token balance
    Balance {
        /// User id (defaults to --actor)
        user: Option<String>,
    },

    /// Show a user's token transactions, newest first
    History {
        /// User id (defaults to --actor)
        user: Option<String>,
    },

    /// List bookings
    Bookings {
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        machine: Option<String>,

        #[arg(long)]
        status: Option<BookingStatus>,
    },

    /// Check the transaction log against the ledger
    Audit,
}

#[derive(Subcommand)]
pub enum UserCommands {
    Add {
        id: String,
        name: String,

        /// startup, facility_admin or resource_admin
        #[arg(long, default_value = "startup")]
        role: Role,

        /// Initial token allocation
        #[arg(long, default_value_t = 0)]
        tokens: u64,
    },
}

#[derive(Subcommand)]
pub enum MachineCommands {
    Add {
        id: String,
        name: String,

        #[arg(long = "type", default_value = "general")]
        machine_type: String,

        /// Tokens per hour (policy default when omitted)
        #[arg(long)]
        cost: Option<u64>,
    },

    Status {
        id: String,

        /// available, maintenance or offline
        status: MachineStatus,
    },

    /// List machines currently available
    List,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    Allocate {
        user: String,
        amount: u64,
        #[arg(short = 'm', long)]
        description: String,
    },

    Adjust {
        user: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(short = 'm', long)]
        description: String,
    },

    Expire {
        user: String,
        amount: u64,
        #[arg(short = 'm', long)]
        description: String,
    },
}

#[derive(Args)]
pub struct BookArgs {
    machine: String,

    /// RFC 3339 start, e.g. 2026-03-02T09:00:00Z
    #[arg(long)]
    start: DateTime<Utc>,

    #[arg(long)]
    end: DateTime<Utc>,

    #[arg(long = "type", default_value = "weekly_planning")]
    booking_type: BookingType,

    #[arg(long)]
    justification: Option<String>,

    /// Book on behalf of another user (admins only)
    #[arg(long = "for")]
    for_user: Option<String>,

    /// Dry-run: validate but don't submit
    #[arg(long)]
    dry_run: bool,
}

/// Build the effective config: environment first, flags override.
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.set_data_dir(PathBuf::from(dir));
    }
    if let Some(format) = &cli.format {
        config.set_output_format(format.clone());
    }
    if cli.log_json {
        config.log_json = true;
    }
    Ok(config)
}

fn require_actor(actor: Option<&str>) -> Result<String> {
    actor
        .map(str::to_string)
        .ok_or_else(|| Error::Config("--actor is required for this command".to_string()))
}

/// Format output based on format type
fn format_output<T: serde::Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::InvalidCommand(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

fn print_booking(booking: &Booking, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", format_output(booking, format)?);
    } else {
        println!(
            "{}  {}  {}  {} -> {}  {}  {} tokens",
            booking.id,
            booking.user_id,
            booking.machine_id,
            booking.start.to_rfc3339(),
            booking.end.to_rfc3339(),
            booking.status,
            booking.tokens_consumed
        );
    }
    Ok(())
}

pub fn run(cli: Cli, config: Config) -> Result<()> {
    let format = config.get_output_format().to_string();
    let actor = cli.actor.as_deref();

    // Opening an empty data directory replays nothing and writes nothing.
    let storage = FileStorage::new(&config);
    let engine = BookingEngine::open(storage, config.policy.clone())?;

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(config.get_data_dir())
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
            println!("Initialized data directory at: {}", config.get_data_dir().display());
            Ok(())
        }

        Commands::User { command } => match command {
            UserCommands::Add { id, name, role, tokens } => {
                let actor = require_actor(actor)?;
                let receipt = engine.register_user(&actor, &id, &name, role, tokens)?;
                println!("✓ User {} registered as {}", id, role);
                for t in &receipt.transactions {
                    println!("  {}: {:+} (balance {})", t.transaction_type, t.amount, t.balance_after);
                }
                Ok(())
            }
        },

        Commands::Machine { command } => match command {
            MachineCommands::Add { id, name, machine_type, cost } => {
                let actor = require_actor(actor)?;
                engine.register_machine(&actor, &id, &name, &machine_type, cost)?;
                println!("✓ Machine {} registered", id);
                Ok(())
            }
            MachineCommands::Status { id, status } => {
                let actor = require_actor(actor)?;
                engine.set_machine_status(&actor, &id, status)?;
                println!("✓ Machine {} is now {}", id, status);
                Ok(())
            }
            MachineCommands::List => {
                let machines = engine.list_available_machines()?;
                if format == "json" {
                    println!("{}", format_output(&machines, &format)?);
                } else {
                    for m in &machines {
                        let cost = m.effective_cost(config.policy.default_token_cost);
                        println!("{}  {}  {}  {} tokens/h", m.id, m.name, m.machine_type, cost);
                    }
                }
                Ok(())
            }
        },

        Commands::Tokens { command } => {
            let actor = require_actor(actor)?;
            let entry = match command {
                TokenCommands::Allocate { user, amount, description } => {
                    engine.allocate_tokens(&actor, &user, amount, &description)?
                }
                TokenCommands::Adjust { user, amount, description } => {
                    engine.adjust_tokens(&actor, &user, amount, &description)?
                }
                TokenCommands::Expire { user, amount, description } => {
                    engine.expire_tokens(&actor, &user, amount, &description)?
                }
            };
            print_transactions(std::slice::from_ref(&entry), &format)
        }

        Commands::Book(args) => {
            let actor = require_actor(actor)?;
            let request = BookingRequest {
                user_id: args.for_user.unwrap_or_else(|| actor.clone()),
                machine_id: args.machine,
                start: Some(args.start),
                end: Some(args.end),
                booking_type: args.booking_type,
                justification: args.justification,
            };

            if args.dry_run {
                let cmd = Command::now(actor, CommandKind::SubmitBooking(request));
                engine.dry_run(&cmd)?;
                println!("✓ Booking request is valid");
                return Ok(());
            }

            let booking = engine.submit_booking_as(&actor, request)?;
            println!("✓ Booking submitted");
            print_booking(&booking, &format)
        }

        Commands::Approve { booking_id } => {
            transition(&engine, &booking_id, BookingStatus::Approved, actor, &format)
        }
        Commands::Reject { booking_id } => {
            transition(&engine, &booking_id, BookingStatus::Rejected, actor, &format)
        }
        Commands::Cancel { booking_id } => {
            transition(&engine, &booking_id, BookingStatus::Cancelled, actor, &format)
        }

        Commands::Balance { user } => {
            let user = user.map_or_else(|| require_actor(actor), Ok)?;
            let balance = engine.get_balance(&user)?;
            let output = BalanceOutput { user_id: user, balance };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::History { user } => {
            let user = user.map_or_else(|| require_actor(actor), Ok)?;
            let history = engine.get_transaction_history(&user)?;
            print_transactions(&history, &format)
        }

        Commands::Bookings { user, machine, status } => {
            let mut bookings = match (&user, &machine) {
                (Some(u), _) => engine.bookings_for_user(u)?,
                (None, Some(m)) => engine.bookings_for_machine(m)?,
                (None, None) => {
                    let mut all = Vec::new();
                    for s in [
                        BookingStatus::Pending,
                        BookingStatus::Approved,
                        BookingStatus::Rejected,
                        BookingStatus::Cancelled,
                    ] {
                        all.extend(engine.bookings_with_status(s)?);
                    }
                    all.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
                    all
                }
            };
            if let Some(m) = &machine {
                bookings.retain(|b| &b.machine_id == m);
            }
            if let Some(s) = status {
                bookings.retain(|b| b.status == s);
            }

            if format == "json" {
                println!("{}", format_output(&bookings, &format)?);
            } else {
                for b in &bookings {
                    print_booking(b, &format)?;
                }
            }
            Ok(())
        }

        Commands::Audit => {
            let report = engine.reconcile()?;
            if format == "json" {
                println!("{}", format_output(&report, &format)?);
            } else {
                for row in &report {
                    println!("✓ {}  remaining {}", row.user_id, row.ledger_remaining);
                }
                println!("✓ Ledger and transaction log agree for {} users", report.len());
            }
            Ok(())
        }
    }
}

fn transition(
    engine: &BookingEngine<FileStorage>,
    booking_id: &str,
    target: BookingStatus,
    actor: Option<&str>,
    format: &str,
) -> Result<()> {
    let actor = require_actor(actor)?;
    let booking = engine.transition_booking(booking_id, target, &actor)?;
    println!("✓ Booking {} is now {}", booking.id, booking.status);
    if format == "json" {
        print_booking(&booking, format)?;
    }
    Ok(())
}

fn print_transactions(entries: &[TokenTransaction], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", format_output(&entries, format)?);
        return Ok(());
    }
    for t in entries {
        println!(
            "#{}  {}  {:<9} {:+6}  {} -> {}  {}",
            t.seq,
            t.created_at.to_rfc3339(),
            t.transaction_type.to_string(),
            t.amount,
            t.balance_before,
            t.balance_after,
            t.description
        );
    }
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct BalanceOutput {
    user_id: String,
    #[serde(flatten)]
    balance: Balance,
}
