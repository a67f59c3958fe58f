use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{FundingRequest, HistoryPage, LedgerService, TransferRequest};
use crate::config::Config;
use crate::domain::{Currency, Money, Transaction, Wallet};

/// Pockets - wallet ledger and transfer engine
#[derive(Parser)]
#[command(name = "pockets")]
#[command(about = "Wallet balances, atomic transfers and currency conversion on a local ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides POCKETS_DATABASE)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print records as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Credit a wallet from outside the ledger
    Deposit(FundingArgs),

    /// Debit a wallet to outside the ledger
    Withdraw(FundingArgs),

    /// Move funds between two wallets
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Sender wallet ID
        #[arg(long)]
        from: String,

        /// Receiver wallet ID
        #[arg(long)]
        to: String,

        /// User ID of the requester; must own the sender wallet
        #[arg(long = "as")]
        actor: String,

        /// Currency code (defaults to the sender wallet's currency)
        #[arg(short, long)]
        currency: Option<String>,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,

        /// Idempotency key; resubmitting with the same key applies once
        #[arg(long)]
        reference: Option<String>,

        /// Date of the transfer (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Convert a wallet to another currency
    Convert {
        /// Wallet ID
        #[arg(long, conflicts_with = "user", required_unless_present = "user")]
        wallet: Option<String>,

        /// Convert this user's primary wallet instead
        #[arg(long)]
        user: Option<String>,

        /// Target currency code (e.g., USD)
        currency: String,
    },

    /// List a user's transactions, newest first
    History {
        /// User ID
        #[arg(long)]
        user: String,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<i64>,

        /// Number of transactions to skip
        #[arg(short, long)]
        offset: Option<i64>,

        /// Filter from date (YYYY-MM-DD, inclusive)
        #[arg(long, requires = "to_date")]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD, inclusive)
        #[arg(long, requires = "from_date")]
        to_date: Option<String>,
    },

    /// Show detailed transaction information
    #[command(name = "show")]
    ShowTransaction {
        /// Transaction ID
        id: String,
    },

    /// Reverse a completed transaction
    Reverse {
        /// Transaction ID to reverse
        id: String,

        /// Idempotency key for the compensating record
        #[arg(long)]
        reference: Option<String>,
    },
}

#[derive(clap::Args)]
pub struct FundingArgs {
    /// Amount (e.g., "50.00" or "50")
    amount: String,

    /// Wallet ID
    #[arg(long)]
    wallet: String,

    /// Currency code (defaults to the wallet's currency)
    #[arg(short, long)]
    currency: Option<String>,

    #[arg(short, long)]
    description: Option<String>,

    /// Idempotency key
    #[arg(long)]
    reference: Option<String>,

    /// Date (YYYY-MM-DD or RFC 3339, defaults to now)
    #[arg(long)]
    date: Option<String>,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Open a new zero-balance wallet for a user
    Open {
        /// Owning user ID (a new one is generated if omitted)
        #[arg(long)]
        user: Option<String>,

        /// Currency code (defaults to POCKETS_DEFAULT_CURRENCY)
        #[arg(short, long)]
        currency: Option<String>,

        /// Wallet name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show a wallet
    Show {
        /// Wallet ID
        id: String,
    },

    /// List a user's wallets
    List {
        /// User ID
        #[arg(long)]
        user: String,
    },

    /// Re-enable a wallet
    Activate {
        /// Wallet ID
        id: String,
    },

    /// Freeze a wallet so it takes part in no posting
    Deactivate {
        /// Wallet ID
        id: String,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Result<Config> {
        let config = Config::from_env().context("Invalid configuration")?;
        Ok(match &self.database {
            Some(path) => config.with_database(path),
            None => config,
        })
    }

    pub async fn run(self, config: Config) -> Result<()> {
        let json = self.json;

        match self.command {
            Commands::Init => {
                LedgerService::init(&config).await?;
                println!("Database initialized: {}", config.database.display());
            }

            Commands::Wallet(wallet_cmd) => {
                let service = LedgerService::connect(&config).await?;
                run_wallet_command(&service, wallet_cmd, json).await?;
            }

            Commands::Deposit(args) => {
                let service = LedgerService::connect(&config).await?;
                let req = funding_request(&service, args).await?;
                let txn = service.deposit(req).await?;
                print_transaction(&txn, json, "Deposited")?;
            }

            Commands::Withdraw(args) => {
                let service = LedgerService::connect(&config).await?;
                let req = funding_request(&service, args).await?;
                let txn = service.withdraw(req).await?;
                print_transaction(&txn, json, "Withdrew")?;
            }

            Commands::Transfer {
                amount,
                from,
                to,
                actor,
                currency,
                description,
                reference,
                date,
            } => {
                let service = LedgerService::connect(&config).await?;
                let amount = parse_amount(&amount)?;
                let sender = parse_id(&from, "sender wallet")?;
                let receiver = parse_id(&to, "receiver wallet")?;
                let actor = parse_id(&actor, "user")?;

                let currency = match currency {
                    Some(code) => parse_currency(&code)?,
                    None => service.wallet(sender).await?.currency,
                };

                let mut req = TransferRequest::new(actor, sender, receiver, amount, currency);
                if let Some(desc) = description {
                    req = req.with_description(desc);
                }
                if let Some(reference) = reference {
                    req = req.with_reference(reference);
                }
                if let Some(date) = date {
                    req = req.with_made_at(parse_date(&date)?);
                }

                let txn = service.transfer(req).await?;
                print_transaction(&txn, json, "Transferred")?;
            }

            Commands::Convert {
                wallet,
                user,
                currency,
            } => {
                let service = LedgerService::connect(&config).await?;
                let balance = match (wallet, user) {
                    (Some(wallet), _) => {
                        let id = parse_id(&wallet, "wallet")?;
                        service.convert_wallet_currency(id, &currency).await?
                    }
                    (None, Some(user)) => {
                        let user = parse_id(&user, "user")?;
                        service.convert_user_wallet_currency(user, &currency).await?
                    }
                    (None, None) => anyhow::bail!("Either --wallet or --user is required"),
                };

                if json {
                    print_json(&serde_json::json!({ "balance": balance, "currency": currency }))?;
                } else {
                    println!("Converted: {} {}", balance, currency);
                }
            }

            Commands::History {
                user,
                limit,
                offset,
                from_date,
                to_date,
            } => {
                let service = LedgerService::connect(&config).await?;
                let user = parse_id(&user, "user")?;

                let page = match (from_date, to_date) {
                    (Some(from), Some(to)) => {
                        let start = parse_date(&from).context("Invalid from-date")?;
                        let end = end_of_day(&to).context("Invalid to-date")?;
                        service
                            .get_history_in_range(user, start, end, limit, offset)
                            .await?
                    }
                    _ => service.get_history(user, limit, offset).await?,
                };
                print_history(&page, json)?;
            }

            Commands::ShowTransaction { id } => {
                let service = LedgerService::connect(&config).await?;
                let id = parse_id(&id, "transaction")?;
                run_show_transaction_command(&service, id, json).await?;
            }

            Commands::Reverse { id, reference } => {
                let service = LedgerService::connect(&config).await?;
                let id = parse_id(&id, "transaction")?;
                let reversal = service.reverse(id, reference).await?;
                print_transaction(&reversal, json, "Reversed")?;
            }
        }

        Ok(())
    }
}

async fn run_wallet_command(
    service: &LedgerService,
    cmd: WalletCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        WalletCommands::Open {
            user,
            currency,
            name,
        } => {
            let user = match user {
                Some(user) => parse_id(&user, "user")?,
                None => Uuid::new_v4(),
            };
            let currency = currency.as_deref().map(parse_currency).transpose()?;

            let wallet = service.open_wallet(user, currency, name).await?;
            if json {
                print_json(&wallet)?;
            } else {
                println!("Opened wallet: {} ({})", wallet.name, wallet.id);
                println!("  Owner:    {}", wallet.user_id);
                println!("  Currency: {}", wallet.currency);
            }
        }

        WalletCommands::Show { id } => {
            let wallet = service.wallet(parse_id(&id, "wallet")?).await?;
            if json {
                print_json(&wallet)?;
            } else {
                print_wallet(&wallet);
            }
        }

        WalletCommands::List { user } => {
            let wallets = service.wallets_for_user(parse_id(&user, "user")?).await?;
            if json {
                print_json(&wallets)?;
            } else if wallets.is_empty() {
                println!("No wallets found.");
            } else {
                println!(
                    "{:<36}  {:<20} {:<8} {:>14} {:<6}",
                    "ID", "NAME", "CURRENCY", "BALANCE", "ACTIVE"
                );
                println!("{}", "-".repeat(90));
                for wallet in wallets {
                    println!(
                        "{:<36}  {:<20} {:<8} {:>14} {:<6}",
                        wallet.id,
                        truncate(&wallet.name, 20),
                        wallet.currency,
                        wallet.balance,
                        if wallet.is_active { "yes" } else { "no" }
                    );
                }
            }
        }

        WalletCommands::Activate { id } => {
            let wallet = service
                .set_wallet_active(parse_id(&id, "wallet")?, true)
                .await?;
            println!("Activated wallet: {}", wallet.id);
        }

        WalletCommands::Deactivate { id } => {
            let wallet = service
                .set_wallet_active(parse_id(&id, "wallet")?, false)
                .await?;
            println!("Deactivated wallet: {}", wallet.id);
        }
    }
    Ok(())
}

async fn run_show_transaction_command(
    service: &LedgerService,
    id: Uuid,
    json: bool,
) -> Result<()> {
    let info = service.get_transaction_info(id).await?;
    let txn = &info.transaction;

    if json {
        return print_json(&serde_json::json!({
            "transaction": txn,
            "reversal": info.reversal,
        }));
    }

    println!("Transaction: {}", txn.id);
    println!("  Reference:   {}", txn.reference_id);
    println!("  Type:        {}", txn.transaction_type);
    println!("  Status:      {}", txn.status);
    println!("  Amount:      {} {}", txn.amount, txn.currency);
    if let Some(sender) = txn.sender_wallet_id {
        println!("  From:        {}", sender);
    }
    if let Some(receiver) = txn.receiver_wallet_id {
        println!("  To:          {}", receiver);
    }
    if !txn.description.is_empty() {
        println!("  Description: {}", txn.description);
    }
    println!("  Date:        {}", txn.made_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "  Recorded at: {}",
        txn.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(original) = txn.reverses {
        println!();
        println!("  This is a reversal of: {}", original);
    }
    if let Some(reversal) = &info.reversal {
        println!();
        println!(
            "  Reversed by: {} on {}",
            reversal.id,
            reversal.made_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

async fn funding_request(service: &LedgerService, args: FundingArgs) -> Result<FundingRequest> {
    let amount = parse_amount(&args.amount)?;
    let wallet = parse_id(&args.wallet, "wallet")?;
    let currency = match args.currency {
        Some(code) => parse_currency(&code)?,
        None => service.wallet(wallet).await?.currency,
    };

    let mut req = FundingRequest::new(wallet, amount, currency);
    if let Some(desc) = args.description {
        req = req.with_description(desc);
    }
    if let Some(reference) = args.reference {
        req = req.with_reference(reference);
    }
    if let Some(date) = args.date {
        req = req.with_made_at(parse_date(&date)?);
    }
    Ok(req)
}

fn print_wallet(wallet: &Wallet) {
    println!("Wallet: {}", wallet.name);
    println!("  ID:       {}", wallet.id);
    println!("  Owner:    {}", wallet.user_id);
    println!("  Balance:  {} {}", wallet.balance, wallet.currency);
    println!(
        "  Active:   {}",
        if wallet.is_active { "yes" } else { "no" }
    );
    println!(
        "  Created:  {}",
        wallet.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_transaction(txn: &Transaction, json: bool, verb: &str) -> Result<()> {
    if json {
        return print_json(txn);
    }
    println!(
        "{}: {} {} [{}] ({})",
        verb, txn.amount, txn.currency, txn.status, txn.id
    );
    println!("  Reference: {}", txn.reference_id);
    Ok(())
}

fn print_history(page: &HistoryPage, json: bool) -> Result<()> {
    if json {
        return print_json(page);
    }
    if page.items.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:>12} {:<4} {:<10} DESCRIPTION",
        "DATE", "TYPE", "AMOUNT", "CUR", "STATUS"
    );
    println!("{}", "-".repeat(80));
    for txn in &page.items {
        println!(
            "{:<12} {:<10} {:>12} {:<4} {:<10} {}",
            txn.made_at.format("%Y-%m-%d"),
            txn.transaction_type,
            txn.amount,
            txn.currency,
            txn.status,
            truncate(&txn.description, 30)
        );
    }
    println!();
    println!(
        "Showing {}-{} of {}",
        page.offset + 1,
        page.offset + page.items.len() as i64,
        page.total
    );
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn parse_amount(raw: &str) -> Result<Money> {
    Money::parse(raw).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", raw))
}

fn parse_currency(raw: &str) -> Result<Currency> {
    Currency::parse(raw).with_context(|| {
        format!("Invalid currency '{}'. Use a three-letter code such as USD", raw)
    })
}

/// Accepts RFC 3339 or a bare date (midnight UTC).
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(date_str) {
        return Ok(at.with_timezone(&Utc));
    }

    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD or RFC 3339 format")?;
    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;
    Ok(naive_datetime.and_utc())
}

/// Last representable instant of a bare date, so date ranges include the whole day.
fn end_of_day(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(date_str) {
        return Ok(at.with_timezone(&Utc));
    }

    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD or RFC 3339 format")?;
    let naive_datetime = naive_date
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;
    Ok(naive_datetime.and_utc())
}
