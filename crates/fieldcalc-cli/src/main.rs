//! fieldcalc CLI - check and evaluate formulas from the command line

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use fieldcalc::prelude::*;
use fieldcalc::{
    compile_with_limits, evaluate, registry, CompileLimits, EvaluationContext, RecordValues,
    Reference, LIBRARY_VERSION,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

#[derive(Parser)]
#[command(name = "fieldcalc")]
#[command(author, version, about = "Formula field checker and evaluator")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Maximum expression nesting depth
    #[arg(long, global = true, default_value_t = CompileLimits::default().max_depth)]
    max_depth: usize,

    /// Maximum number of expression nodes
    #[arg(long, global = true, default_value_t = CompileLimits::default().max_nodes)]
    max_nodes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a formula and show its canonical form and dependencies
    #[command(alias = "check")]
    Parse {
        /// Formula source, e.g. "{Price} * {Quantity}"
        formula: String,

        /// Field available to the formula (repeatable)
        #[arg(short, long = "field", value_name = "NAME")]
        fields: Vec<String>,

        /// Link field and the fields of its target table, e.g. "Orders=Amount,Date"
        #[arg(short, long = "link", value_name = "LINK=FIELD,...")]
        links: Vec<String>,
    },

    /// Evaluate a formula against one record
    Eval {
        /// Formula source
        formula: String,

        /// Field value, e.g. "Price=12.5" (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        values: Vec<String>,

        /// Values of a field on linked records, e.g. "Orders.Amount=10,20"
        #[arg(short, long = "lookup", value_name = "LINK.FIELD=V,...")]
        lookups: Vec<String>,

        /// Fixed current time for NOW() and TODAY()
        #[arg(long, value_name = "DATETIME")]
        now: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the function library
    Functions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let limits = CompileLimits {
        max_depth: cli.max_depth,
        max_nodes: cli.max_nodes,
    };

    match cli.command {
        Commands::Parse {
            formula,
            fields,
            links,
        } => {
            let links = links
                .iter()
                .map(|spec| parse_link(spec))
                .collect::<Result<Vec<_>>>()?;
            show_parse(&formula, &fields, &links, &limits)
        }
        Commands::Eval {
            formula,
            values,
            lookups,
            now,
            json,
        } => {
            let values = values
                .iter()
                .map(|spec| parse_assignment(spec))
                .collect::<Result<Vec<_>>>()?;
            let lookups = lookups
                .iter()
                .map(|spec| parse_lookup(spec))
                .collect::<Result<Vec<_>>>()?;
            let now = now.as_deref().map(parse_now).transpose()?;
            run_eval(&formula, &values, &lookups, now, &limits, json)
        }
        Commands::Functions => {
            list_functions();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Scratch schema holding one record table plus a target table per link
struct Sandbox {
    schema: Schema,
    table: TableId,
}

impl Sandbox {
    fn new() -> Self {
        let mut schema = Schema::new();
        let table = schema.add_table("Record");
        Self { schema, table }
    }

    fn field(&mut self, name: &str) -> Result<FieldId> {
        if let Some(def) = self.schema.field_by_name(self.table, name.trim()) {
            return Ok(def.id);
        }
        self.schema
            .add_field(self.table, name, FieldKind::Plain)
            .with_context(|| format!("Invalid field '{}'", name))
    }

    /// Declare a link field and the fields of its target table
    fn link(&mut self, link: &str, fields: &[String]) -> Result<(FieldId, Vec<FieldId>)> {
        let link_name = link.trim();
        let (link_id, target) = match self.schema.field_by_name(self.table, link_name) {
            Some(def) => match def.kind {
                FieldKind::Link { target } => (def.id, target),
                _ => bail!("'{}' is already declared as a plain field", link_name),
            },
            None => {
                let target = self.schema.add_table(link_name);
                let id = self
                    .schema
                    .add_field(self.table, link_name, FieldKind::Link { target })
                    .with_context(|| format!("Invalid link field '{}'", link_name))?;
                (id, target)
            }
        };

        let mut ids = Vec::with_capacity(fields.len());
        for name in fields {
            let id = match self.schema.field_by_name(target, name.trim()) {
                Some(def) => def.id,
                None => self
                    .schema
                    .add_field(target, name, FieldKind::Plain)
                    .with_context(|| format!("Invalid field '{}' on link '{}'", name, link_name))?,
            };
            ids.push(id);
        }
        Ok((link_id, ids))
    }

    fn compile(&self, formula: &str, limits: &CompileLimits) -> Result<CompiledFormula> {
        compile_with_limits(formula, &self.schema.resolver(self.table), limits)
            .with_context(|| format!("Failed to compile '{}'", formula))
    }

    fn name(&self, field: FieldId) -> &str {
        self.schema
            .field(field)
            .map(|def| def.name.as_str())
            .unwrap_or("?")
    }
}

fn show_parse(
    formula: &str,
    fields: &[String],
    links: &[(String, Vec<String>)],
    limits: &CompileLimits,
) -> Result<()> {
    let mut sandbox = Sandbox::new();
    for name in fields {
        sandbox.field(name)?;
    }
    for (link, remote) in links {
        sandbox.link(link, remote)?;
    }

    let compiled = sandbox.compile(formula, limits)?;
    let resolver = sandbox.schema.resolver(sandbox.table);

    println!("Formula:   {}", compiled.root.to_source(&resolver));

    let reads: Vec<String> = compiled
        .references
        .iter()
        .map(|reference| match *reference {
            Reference::Field(id) => format!("{{{}}}", sandbox.name(id)),
            Reference::Linked { link, field } => {
                format!("{{{}}}.{{{}}}", sandbox.name(link), sandbox.name(field))
            }
        })
        .collect();
    if reads.is_empty() {
        println!("Reads:     (nothing)");
    } else {
        println!("Reads:     {}", reads.join(", "));
    }
    println!("Volatile:  {}", if compiled.volatile { "yes" } else { "no" });
    println!(
        "Size:      {} nodes, depth {}",
        compiled.root.node_count(),
        compiled.root.depth()
    );
    Ok(())
}

fn run_eval(
    formula: &str,
    values: &[(String, Value)],
    lookups: &[Lookup],
    now: Option<NaiveDateTime>,
    limits: &CompileLimits,
    json: bool,
) -> Result<()> {
    let mut sandbox = Sandbox::new();
    let mut record = RecordValues::new();

    for (name, value) in values {
        let id = sandbox.field(name)?;
        record.set(id, value.clone());
    }
    for lookup in lookups {
        let (link, fields) = sandbox.link(&lookup.link, std::slice::from_ref(&lookup.field))?;
        record.set_linked(link, fields[0], lookup.values.clone());
    }

    let compiled = sandbox.compile(formula, limits)?;
    debug!(formula = %compiled.source, volatile = compiled.volatile, "evaluating");

    let mut ctx = EvaluationContext::simple();
    ctx.record = Some(&record);
    if let Some(now) = now {
        ctx = ctx.with_now(now);
    }
    let value = evaluate(&compiled.root, &ctx);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialize result")?
        );
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn list_functions() {
    let registry = registry();
    println!(
        "Function library v{} ({} functions)",
        LIBRARY_VERSION,
        registry.len()
    );
    for def in registry.definitions() {
        let volatile = if def.volatile { "  [volatile]" } else { "" };
        println!("  {}{}", def.signature(), volatile);
    }
}

/// Values of one remote field across linked records
#[derive(Debug, PartialEq)]
struct Lookup {
    link: String,
    field: String,
    values: Vec<Value>,
}

/// Parse "NAME=VALUE"
fn parse_assignment(spec: &str) -> Result<(String, Value)> {
    let (name, raw) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{}'", spec))?;
    if name.trim().is_empty() {
        bail!("Missing field name in '{}'", spec);
    }
    Ok((name.trim().to_string(), parse_value(raw)))
}

/// Parse "LINK=FIELD,FIELD"
fn parse_link(spec: &str) -> Result<(String, Vec<String>)> {
    let (link, fields) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected LINK=FIELD,..., got '{}'", spec))?;
    let fields: Vec<String> = fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if link.trim().is_empty() || fields.is_empty() {
        bail!("Expected LINK=FIELD,..., got '{}'", spec);
    }
    Ok((link.trim().to_string(), fields))
}

/// Parse "LINK.FIELD=V,V"
fn parse_lookup(spec: &str) -> Result<Lookup> {
    let (target, raw) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected LINK.FIELD=V,..., got '{}'", spec))?;
    let (link, field) = target
        .split_once('.')
        .ok_or_else(|| anyhow!("Expected LINK.FIELD before '=', got '{}'", target))?;
    if link.trim().is_empty() || field.trim().is_empty() {
        bail!("Expected LINK.FIELD before '=', got '{}'", target);
    }
    let values = if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(parse_value).collect()
    };
    Ok(Lookup {
        link: link.trim().to_string(),
        field: field.trim().to_string(),
        values,
    })
}

/// Interpret a command-line value: blank, boolean, number, date, else text
fn parse_value(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    if let Ok(n) = Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)) {
        return Value::Number(n);
    }
    if let Some(date) = parse_date(text) {
        return Value::Date(date);
    }
    Value::text(raw)
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_now(text: &str) -> Result<NaiveDateTime> {
    parse_date(text.trim()).ok_or_else(|| anyhow!("Invalid date for --now: '{}'", text))
}
