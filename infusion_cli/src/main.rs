use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use infusion_core::export::export_series;
use infusion_core::*;
use std::io::{self, Write};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "titrate")]
#[command(about = "Infusion titration decision support", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Apply critical decisions without asking for confirmation
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    /// Dry run - show the decision without recording it
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Heparin dose change from an aPTT value
    Heparin {
        /// aPTT in seconds
        #[arg(long, allow_negative_numbers = true)]
        aptt: f64,
    },

    /// Non-DKA insulin starting rate
    InsulinStart {
        /// Blood glucose in mg/dL
        #[arg(long, allow_negative_numbers = true)]
        bg: f64,
    },

    /// Non-DKA insulin rate adjustment
    InsulinAdjust {
        /// Current infusion rate in units/hr
        #[arg(long, allow_negative_numbers = true)]
        rate: f64,

        /// Current blood glucose in mg/dL
        #[arg(long, allow_negative_numbers = true)]
        bg: f64,

        /// Previous blood glucose in mg/dL
        #[arg(long, allow_negative_numbers = true)]
        previous_bg: Option<f64>,

        /// Patient has type 1 diabetes
        #[arg(long)]
        t1dm: bool,
    },

    /// DKA/HHS protocol phases
    Dka {
        #[command(subcommand)]
        phase: DkaCommand,
    },

    /// Record a reading directly
    Record {
        #[arg(long, value_enum)]
        family: FamilyArg,

        #[arg(long, value_enum)]
        kind: KindArg,

        #[arg(long, allow_negative_numbers = true)]
        value: f64,

        /// Reading time (RFC 3339), defaults to now. Future times are rejected.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// List provider-notification flags
    Flags {
        /// Include acknowledged flags
        #[arg(long)]
        all: bool,
    },

    /// Acknowledge a flag
    Ack { id: Uuid },

    /// Remove a flag
    ClearFlag { id: Uuid },

    /// Show glucose and rate trend
    Trend {
        #[arg(long, value_enum)]
        family: FamilyArg,

        #[arg(long, value_enum, default_value = "both")]
        series: SeriesArg,

        /// Lookback window in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Write the series to a CSV file instead of printing it
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show the calculation history
    History {
        /// Clear all history
        #[arg(long)]
        clear: bool,
    },

    /// Remove tracked readings
    ClearData {
        #[arg(long, value_enum, default_value = "all")]
        scope: ScopeArg,
    },

    /// Show monitoring status
    Status,

    /// Show or change preferences
    Prefs {
        #[arg(long)]
        dark_mode: Option<bool>,

        /// Hide the clinical disclaimer
        #[arg(long)]
        accept_disclaimer: bool,
    },
}

#[derive(Subcommand)]
enum DkaCommand {
    /// Regular insulin IV bolus
    Bolus(WeightArgs),

    /// Phase 1 infusion start
    Initiation(WeightArgs),

    /// Phase 1 hourly adjustment
    Continuation {
        /// Current infusion rate in units/hr
        #[arg(long, allow_negative_numbers = true)]
        rate: f64,

        /// Percent drop in blood glucose over the last hour
        #[arg(long, allow_negative_numbers = true)]
        drop: f64,
    },

    /// Transition once glucose falls to 250 mg/dL
    Transition {
        #[command(flatten)]
        weight: WeightArgs,

        /// Current infusion rate in units/hr
        #[arg(long, allow_negative_numbers = true)]
        rate: f64,
    },

    /// Phase 2 adjustment by glucose
    Phase2 {
        /// Current infusion rate in units/hr
        #[arg(long, allow_negative_numbers = true)]
        rate: f64,

        /// Current blood glucose in mg/dL
        #[arg(long, allow_negative_numbers = true)]
        bg: f64,
    },
}

#[derive(Args)]
struct WeightArgs {
    /// Patient weight (kg unless --lbs)
    #[arg(long, allow_negative_numbers = true)]
    weight: f64,

    /// Weight is given in pounds
    #[arg(long)]
    lbs: bool,
}

impl WeightArgs {
    fn kg(&self) -> f64 {
        if self.lbs {
            lbs_to_kg(self.weight)
        } else {
            self.weight
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
    DkaHhs,
    NonDka,
}

impl From<FamilyArg> for ProtocolFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::DkaHhs => ProtocolFamily::DkaHhs,
            FamilyArg::NonDka => ProtocolFamily::NonDka,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Glucose,
    Rate,
}

impl From<KindArg> for ReadingKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Glucose => ReadingKind::Glucose,
            KindArg::Rate => ReadingKind::InfusionRate,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SeriesArg {
    Bg,
    Rate,
    Both,
}

impl From<SeriesArg> for SeriesSelector {
    fn from(arg: SeriesArg) -> Self {
        match arg {
            SeriesArg::Bg => SeriesSelector::Bg,
            SeriesArg::Rate => SeriesSelector::Rate,
            SeriesArg::Both => SeriesSelector::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Glucose,
    Rates,
    All,
}

impl From<ScopeArg> for ClearScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Glucose => ClearScope::Glucose,
            ScopeArg::Rates => ClearScope::Rates,
            ScopeArg::All => ClearScope::All,
        }
    }
}

const DISCLAIMER: &str = "Clinical decision support only. Verify every result against your institutional protocol and provider orders.";

fn main() -> Result<()> {
    // Initialize logging
    infusion_core::logging::init();

    let cli = Cli::parse();

    match run(cli) {
        Err(e) if e.is_input_error() => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
        other => other,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());

    let mut controller = Controller::open(Box::new(FileStore::new(&data_dir)), &config);
    let now = Utc::now();

    let decision = match cli.command {
        Commands::Heparin { aptt } => titrate_heparin(aptt)?,
        Commands::InsulinStart { bg } => initial_rate(bg)?,
        Commands::InsulinAdjust {
            rate,
            bg,
            previous_bg,
            t1dm,
        } => adjust_rate(rate, bg, previous_bg, t1dm)?,
        Commands::Dka { phase } => match phase {
            DkaCommand::Bolus(w) => dka_bolus(w.kg())?,
            DkaCommand::Initiation(w) => dka_initiation(w.kg())?,
            DkaCommand::Continuation { rate, drop } => dka_phase1_continuation(rate, drop)?,
            DkaCommand::Transition { weight, rate } => dka_transition(weight.kg(), rate)?,
            DkaCommand::Phase2 { rate, bg } => dka_phase2(rate, bg)?,
        },
        Commands::Record {
            family,
            kind,
            value,
            at,
        } => return cmd_record(&mut controller, family.into(), kind.into(), value, at.unwrap_or(now), now),
        Commands::Flags { all } => return cmd_flags(&controller, all),
        Commands::Ack { id } => return cmd_ack(&mut controller, id),
        Commands::ClearFlag { id } => return cmd_clear_flag(&mut controller, id),
        Commands::Trend {
            family,
            series,
            hours,
            csv,
        } => return cmd_trend(&controller, family.into(), series.into(), hours, csv, now),
        Commands::History { clear } => return cmd_history(&mut controller, clear),
        Commands::ClearData { scope } => return cmd_clear_data(&mut controller, scope.into()),
        Commands::Status => return cmd_status(&controller),
        Commands::Prefs {
            dark_mode,
            accept_disclaimer,
        } => return cmd_prefs(&mut controller, dark_mode, accept_disclaimer),
    };

    if !controller.preferences().disclaimer_accepted {
        eprintln!("{}", DISCLAIMER);
    }
    display_decision(&decision);

    if cli.dry_run {
        println!("\n[Dry run - not recorded]");
        return Ok(());
    }

    if decision.requires_confirmation && !cli.yes && !confirm()? {
        println!("Calculation cancelled");
        return Ok(());
    }

    let raised = controller.apply(&decision, now)?;
    display_flags(&raised);
    Ok(())
}

fn display_decision(decision: &TitrationDecision) {
    println!();
    println!("[{}] {}", decision.severity.label(), decision.protocol.name());
    println!("  {}", decision.action);

    if let Some(ref bolus) = decision.bolus {
        println!("  Bolus: {}", bolus);
    }
    if let Some(ref hold) = decision.hold {
        println!("  Hold: {}", hold);
    }
    if let Some(rate) = decision.new_rate {
        println!("  New rate: {:.1} units/hr", rate);
    }
    if let Some(ref next) = decision.next_check {
        println!("  Next check: {}", next);
    }
    if let Some(ref follow_up) = decision.follow_up {
        println!("  Follow-up: {}", follow_up);
    }
    for note in &decision.notes {
        println!("  Note: {}", note);
    }
}

fn display_flags(flags: &[Flag]) {
    for flag in flags {
        let marker = match flag.severity {
            FlagSeverity::Critical => "CRITICAL",
            FlagSeverity::Info => "INFO",
        };
        println!("\n⚑ {} FLAG: {}", marker, flag.message);
        println!("  id: {}", flag.id);
    }
}

fn confirm() -> Result<bool> {
    print!("Critical value. Proceed? [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn cmd_record(
    controller: &mut Controller,
    family: ProtocolFamily,
    kind: ReadingKind,
    value: f64,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let raised = controller.record(family, kind, value, at, now)?;
    println!("✓ Recorded {} reading for {}", kind_label(kind), family.label());
    display_flags(&raised);
    Ok(())
}

fn kind_label(kind: ReadingKind) -> &'static str {
    match kind {
        ReadingKind::Glucose => "glucose",
        ReadingKind::InfusionRate => "infusion rate",
    }
}

fn cmd_flags(controller: &Controller, all: bool) -> Result<()> {
    let flags: Vec<&Flag> = controller
        .monitor()
        .active_flags
        .iter()
        .filter(|f| all || !f.acknowledged)
        .collect();

    if flags.is_empty() {
        println!("No active flags");
        return Ok(());
    }

    for flag in flags {
        println!(
            "{}  {:?}  {}  {}{}",
            flag.id,
            flag.severity,
            flag.timestamp.to_rfc3339(),
            flag.message,
            if flag.acknowledged { "  (acknowledged)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_ack(controller: &mut Controller, id: Uuid) -> Result<()> {
    if controller.acknowledge(id) {
        println!("✓ Flag acknowledged");
    } else {
        println!("No flag with id {}", id);
    }
    Ok(())
}

fn cmd_clear_flag(controller: &mut Controller, id: Uuid) -> Result<()> {
    match controller.clear_flag(id) {
        Some(_) => println!("✓ Flag cleared"),
        None => println!("No flag with id {}", id),
    }
    Ok(())
}

fn cmd_trend(
    controller: &Controller,
    family: ProtocolFamily,
    selector: SeriesSelector,
    hours: i64,
    csv: Option<PathBuf>,
    now: DateTime<Utc>,
) -> Result<()> {
    let lookback = Duration::try_hours(hours)
        .filter(|_| hours > 0)
        .ok_or_else(|| Error::Validation("Lookback hours must be positive.".into()))?;
    let points = controller.series(family, selector, lookback, now);

    if let Some(path) = csv {
        let count = export_series(&path, &points)?;
        println!("✓ Exported {} points to {}", count, path.display());
        return Ok(());
    }

    if points.is_empty() {
        println!("No readings in the last {} hours", hours);
        return Ok(());
    }

    println!("{:<27} {:>8} {:>10}", "Time", "BG", "Rate");
    for point in &points {
        println!(
            "{:<27} {:>8} {:>10}",
            point.timestamp.to_rfc3339(),
            point.bg.map(|v| format!("{:.0}", v)).unwrap_or_default(),
            point.rate.map(|v| format!("{:.1}", v)).unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_history(controller: &mut Controller, clear: bool) -> Result<()> {
    if clear {
        controller.clear_history();
        println!("✓ History cleared");
        return Ok(());
    }

    let history = controller.history();
    if history.is_empty() {
        println!("No calculations yet");
        return Ok(());
    }

    for entry in history.entries() {
        println!(
            "{}{}  {}",
            if entry.is_critical { "! " } else { "  " },
            entry.timestamp.to_rfc3339(),
            entry.protocol
        );
        println!("    Input: {}", entry.inputs);
        println!("    Result: {}", entry.result);
    }
    Ok(())
}

fn cmd_clear_data(controller: &mut Controller, scope: ClearScope) -> Result<()> {
    let removed = controller.clear_tracking_data(scope);
    println!("✓ Removed {} readings", removed);
    Ok(())
}

fn cmd_status(controller: &Controller) -> Result<()> {
    let status = controller.monitor().status();
    println!("Total readings: {}", status.total_readings);
    println!("  Glucose: {}", status.glucose_readings);
    println!("  Infusion rate: {}", status.rate_readings);
    println!("Active flags: {}", status.active_flags);
    println!("History entries: {}", controller.history().len());
    if controller.is_degraded() {
        println!("Storage: unavailable (in-memory only)");
    }
    Ok(())
}

fn cmd_prefs(
    controller: &mut Controller,
    dark_mode: Option<bool>,
    accept_disclaimer: bool,
) -> Result<()> {
    if dark_mode.is_some() || accept_disclaimer {
        controller.update_preferences(|prefs| {
            if let Some(dark) = dark_mode {
                prefs.dark_mode = dark;
            }
            if accept_disclaimer {
                prefs.disclaimer_accepted = true;
            }
        });
    }

    let prefs = controller.preferences();
    println!("dark_mode = {}", prefs.dark_mode);
    println!("disclaimer_accepted = {}", prefs.disclaimer_accepted);
    Ok(())
}
