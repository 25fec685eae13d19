//! Firewall rule command handlers.

use std::sync::Arc;
use std::time::Duration;

use tabled::Tabled;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use firesync_api::RulesClient;
use firesync_core::{QueryClient, QueryDescriptor, QuerySnapshot, Rule, RuleId, RulePatch};

use crate::cli::{FilterArgs, GlobalOpts, RulesArgs, RulesCommand};
use crate::config::Config;
use crate::error::CliError;
use crate::output;

pub type Client = QueryClient<RulesClient>;

/// Build a query client talking HTTP to the configured backend.
pub fn build_client(config: &Config) -> Result<Client, CliError> {
    let cache = config.cache.to_cache_config();
    cache.validate()?;
    let api = RulesClient::new(&config.backend.url, &config.backend.to_transport())?;
    Ok(QueryClient::new(api, cache))
}

fn descriptor(filter: &FilterArgs) -> QueryDescriptor {
    let mut d = QueryDescriptor::new();
    if let Some(ref text) = filter.search {
        d = d.with_text(text.clone());
    }
    if filter.enabled_only {
        d = d.with_enabled_only(true);
    }
    if let Some(action) = filter.action {
        d = d.with_action(action);
    }
    if filter.simulate_failure {
        d = d.with_simulated_failure(true);
    }
    d
}

// ── Rule table row ──────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Proto")]
    protocol: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

impl From<&Arc<Rule>> for RuleRow {
    fn from(r: &Arc<Rule>) -> Self {
        Self {
            id: r.id.to_string(),
            name: r.name.clone(),
            action: r.action.to_string(),
            protocol: r.protocol.to_string(),
            source: r.source.clone(),
            destination: r.destination.clone(),
            port: r.port.clone(),
            enabled: if r.enabled { "yes" } else { "no" }.into(),
        }
    }
}

fn rule_detail(r: &Arc<Rule>) -> String {
    [
        format!("ID:          {}", r.id),
        format!("Name:        {}", r.name),
        format!("Action:      {}", r.action),
        format!("Protocol:    {}", r.protocol),
        format!("Source:      {}", r.source),
        format!("Destination: {}", r.destination),
        format!("Port:        {}", r.port),
        format!("Enabled:     {}", r.enabled),
    ]
    .join("\n")
}

fn render_rules(global: &GlobalOpts, rules: &[Arc<Rule>]) -> Result<String, CliError> {
    output::render_list(
        &global.output,
        rules,
        |r| RuleRow::from(r),
        |r| r.id.to_string(),
    )
}

fn render_rule(global: &GlobalOpts, rule: &Arc<Rule>) -> Result<String, CliError> {
    output::render_single(&global.output, rule, rule_detail, |r| r.id.to_string())
}

// ── Loading ─────────────────────────────────────────────────────────

/// Subscribe to `descriptor` and wait for its first settled snapshot.
async fn load(client: &Client, descriptor: &QueryDescriptor) -> Result<QuerySnapshot, CliError> {
    let mut sub = client.query(descriptor);
    let snap = sub
        .settled()
        .await
        .ok_or_else(|| CliError::Internal("query entry closed before settling".into()))?;
    match snap.error {
        Some(err) => Err(err.into()),
        None => Ok(snap),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(client: &Client, args: RulesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        RulesCommand::List(filter) => {
            let snap = load(client, &descriptor(&filter)).await?;
            debug!(rules = snap.data.len(), "list loaded");
            output::print_output(&render_rules(global, &snap.data)?, global.quiet);
            Ok(())
        }

        RulesCommand::Get { id } => {
            load(client, &QueryDescriptor::new()).await?;
            let rule = client
                .read_entity(&RuleId::new(id.as_str()))
                .ok_or(CliError::NotFound { identifier: id })?;
            output::print_output(&render_rule(global, &rule)?, global.quiet);
            Ok(())
        }

        RulesCommand::Enable { id } => patch(client, id, RulePatch::enabled(true), global).await,

        RulesCommand::Disable { id } => patch(client, id, RulePatch::enabled(false), global).await,

        RulesCommand::Update {
            id,
            name,
            source,
            destination,
            port,
            protocol,
            action,
        } => {
            let update = RulePatch {
                name,
                source,
                destination,
                protocol,
                port,
                action,
                enabled: None,
            };
            patch(client, id, update, global).await
        }

        RulesCommand::Watch {
            filter,
            interval,
            count,
        } => watch(client, &descriptor(&filter), interval, count, global).await,
    }
}

async fn patch(
    client: &Client,
    id: String,
    update: RulePatch,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if update.is_empty() {
        return Err(CliError::Validation {
            field: "update".into(),
            reason: "nothing to change; pass at least one field flag".into(),
        });
    }

    // The rule must be in the entity table before it can be patched.
    load(client, &QueryDescriptor::new()).await?;

    let rule_id = RuleId::from(id);
    let updated = Arc::new(client.mutate(&rule_id, update, &[]).await?);
    output::print_output(&render_rule(global, &updated)?, global.quiet);

    if !global.quiet {
        let color = output::should_color(&global.color);
        let state = if updated.enabled { "enabled" } else { "disabled" };
        eprintln!(
            "{}",
            output::status_line(&format!("Rule {rule_id} updated ({state})"), true, color)
        );
    }
    Ok(())
}

// ── Watch ───────────────────────────────────────────────────────────

async fn watch(
    client: &Client,
    descriptor: &QueryDescriptor,
    interval: u64,
    count: Option<usize>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let mut sub = client.query(descriptor);
    client.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut rendered = 0usize;
    let mut next = sub.settled().await;
    while let Some(snap) = next.take() {
        if snap.is_success() {
            render_watch_frame(&snap, global, color)?;
            rendered += 1;
            if count.is_some_and(|n| rendered >= n) {
                break;
            }
        } else if let Some(ref err) = snap.error {
            eprintln!(
                "{}",
                output::status_line(&err.display_message("Failed to load firewall rules"), false, color)
            );
        }

        loop {
            tokio::select! {
                changed = sub.changed() => {
                    match changed {
                        Some(snap) if snap.is_loading() || snap.is_refetching => {}
                        other => {
                            next = other;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    debug!(key = %sub.key(), "periodic reload");
                    drop(sub.reload());
                }
                _ = &mut ctrl_c => break,
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn render_watch_frame(snap: &QuerySnapshot, global: &GlobalOpts, color: bool) -> Result<(), CliError> {
    if !global.quiet {
        let at = snap
            .fetched_at
            .map_or_else(|| "-".into(), |t| t.format("%H:%M:%S UTC").to_string());
        eprintln!(
            "{}",
            output::hint(&format!("── {} rules · {at} ──", snap.data.len()), color)
        );
    }
    output::print_output(&render_rules(global, &snap.data)?, global.quiet);
    Ok(())
}
