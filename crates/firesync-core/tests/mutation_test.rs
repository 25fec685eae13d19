#![allow(clippy::unwrap_used)]

mod common;

use common::{MemoryBackend, ScriptedBackend, corpus, ids, rule, scripted, settle};
use firesync_core::{
    CacheConfig, CommitOutcome, CoreError, QueryClient, QueryDescriptor, QuerySnapshot, Rule,
    RuleAction, RuleId, RulePatch,
};
use pretty_assertions::assert_eq;

fn client(backend: ScriptedBackend) -> QueryClient<ScriptedBackend> {
    QueryClient::new(backend, CacheConfig::default())
}

fn spawn_mutate(
    client: &QueryClient<ScriptedBackend>,
    id: &str,
    patch: RulePatch,
) -> tokio::task::JoinHandle<Result<Rule, CoreError>> {
    let client = client.clone();
    let id = RuleId::new(id);
    tokio::spawn(async move { client.mutate(&id, patch, &[]).await })
}

#[tokio::test(start_paused = true)]
async fn optimistic_value_is_visible_before_the_write_resolves() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(corpus());
    sub.settled().await.unwrap();

    let pending = spawn_mutate(&client, "fw-4", RulePatch::enabled(true));
    let write = script.next_patch().await;
    assert_eq!(write.id.as_str(), "fw-4");
    assert_eq!(write.patch, RulePatch::enabled(true));

    assert!(client.read_entity(&RuleId::new("fw-4")).unwrap().enabled);
    let shown = sub.snapshot();
    assert!(shown.data.iter().find(|r| r.id.as_str() == "fw-4").unwrap().enabled);

    let mut confirmed = rule("fw-4", "Allow DNS resolvers", RuleAction::Allow, true);
    confirmed.port = "53".into();
    write.ok(confirmed.clone());
    assert_eq!(pending.await.unwrap().unwrap(), confirmed);
    assert_eq!(*client.read_entity(&RuleId::new("fw-4")).unwrap(), confirmed);
}

#[tokio::test(start_paused = true)]
async fn rejected_write_restores_the_exact_prior_row() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let original = rule("r1", "Block guest VLAN", RuleAction::Deny, false);

    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(vec![original.clone()]);
    sub.settled().await.unwrap();

    let pending = spawn_mutate(&client, "r1", RulePatch::enabled(true));
    let write = script.next_patch().await;
    assert!(client.read_entity(&RuleId::new("r1")).unwrap().enabled);

    write.fail("Simulated firewall rule update error", 500);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::MutationConflict { ref id, .. } if id.as_str() == "r1"));
    assert_eq!(
        err.display_message("Failed to update rule"),
        "Simulated firewall rule update error"
    );

    assert_eq!(*client.read_entity(&RuleId::new("r1")).unwrap(), original);
    assert_eq!(*sub.snapshot().data[0], original);

    // A failed write invalidates nothing.
    settle().await;
    script.assert_silent();
    assert!(!client.store().is_dirty(sub.key()));
}

#[tokio::test(start_paused = true)]
async fn successful_write_invalidates_and_resyncs_lists() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let all = QueryDescriptor::new();
    let enabled = QueryDescriptor::new().with_enabled_only(true);

    let mut all_sub = client.query(&all);
    script.next_fetch().await.ok(corpus());
    let mut enabled_sub = client.query(&enabled);
    script
        .next_fetch()
        .await
        .ok(corpus().into_iter().filter(|r| r.enabled).collect());
    all_sub.settled().await.unwrap();
    enabled_sub.settled().await.unwrap();

    let pending = spawn_mutate(&client, "fw-2", RulePatch::enabled(false));
    let write = script.next_patch().await;
    // The enabled-only list still lists fw-2, now shown disabled.
    let during = enabled_sub.snapshot();
    assert!(!during.data.iter().find(|r| r.id.as_str() == "fw-2").unwrap().enabled);

    write.ok(rule("fw-2", "Allow HTTPS inbound", RuleAction::Allow, false));
    pending.await.unwrap().unwrap();

    // Both subscribed lists carry the list tag and refetch.
    let mut refetches = vec![script.next_fetch().await, script.next_fetch().await];
    settle().await;
    script.assert_silent();
    refetches.sort_by_key(|call| call.query.enabled_only);

    let mut server = corpus();
    server[1].enabled = false;
    let enabled_call = refetches.pop().unwrap();
    assert!(enabled_call.query.enabled_only);
    enabled_call.ok(server.iter().filter(|r| r.enabled).cloned().collect());
    refetches.pop().unwrap().ok(server);

    let enabled_snap = enabled_sub.settled().await.unwrap();
    assert_eq!(ids(&enabled_snap.data), vec!["fw-1", "fw-3"]);
}

#[tokio::test(start_paused = true)]
async fn affected_keys_are_invalidated_on_success() {
    let backend = MemoryBackend::new(corpus());
    let client = QueryClient::new(backend, CacheConfig::default());
    let all = QueryDescriptor::new();
    let deny = QueryDescriptor::new().with_action(RuleAction::Deny);

    let mut sub = client.query(&all);
    sub.settled().await.unwrap();
    let mut deny_sub = client.query(&deny);
    deny_sub.settled().await.unwrap();
    drop(deny_sub);

    client
        .mutate(
            &RuleId::new("fw-1"),
            RulePatch {
                action: Some(RuleAction::Deny),
                ..RulePatch::default()
            },
            &[deny.canonical().key()],
        )
        .await
        .unwrap();

    assert!(client.store().is_dirty(&deny.canonical().key()));
    let mut deny_again = client.query(&deny);
    let snap = deny_again.settled().await.unwrap();
    assert_eq!(ids(&snap.data), vec!["fw-1", "fw-3", "fw-5"]);
}

#[tokio::test(start_paused = true)]
async fn unknown_rule_fails_fast_without_a_network_call() {
    let (backend, mut script) = scripted();
    let client = client(backend);

    let err = client
        .mutate(&RuleId::new("ghost"), RulePatch::enabled(true), &[])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::NotFound {
            identifier: "ghost".into()
        }
    );
    settle().await;
    script.assert_silent();
}

#[tokio::test(start_paused = true)]
async fn write_404_maps_to_not_found_and_rolls_back() {
    let backend = MemoryBackend::new(corpus());
    let client = QueryClient::new(backend, CacheConfig::default());
    let mut sub = client.query(&QueryDescriptor::new());
    sub.settled().await.unwrap();

    // Loaded earlier, deleted upstream since.
    let stale = rule("fw-9", "Temporary hole", RuleAction::Allow, true);
    let hole = client.store().get_or_create(&QueryDescriptor::new().with_text("hole").canonical());
    let ticket = client.store().begin_request(&hole).unwrap();
    client.store().commit_success(&ticket, vec![stale.clone()]);

    let err = client
        .mutate(&RuleId::new("fw-9"), RulePatch::enabled(false), &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Not found: fw-9");
    assert_eq!(*client.read_entity(&RuleId::new("fw-9")).unwrap(), stale);
}

#[tokio::test(start_paused = true)]
async fn fresher_server_data_wins_over_rollback() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(corpus());
    sub.settled().await.unwrap();

    let pending = spawn_mutate(&client, "fw-1", RulePatch::enabled(false));
    let write = script.next_patch().await;

    // An unrelated reload lands while the write is pending.
    let reload = sub.reload();
    let mut upstream = corpus();
    upstream[0].name = "Allow SSH from office (v2)".into();
    script.next_fetch().await.ok(upstream.clone());
    reload.await.unwrap();

    let during = client.read_entity(&RuleId::new("fw-1")).unwrap();
    assert!(!during.enabled, "speculative value survives the refetch");
    assert_eq!(during.name, "Allow SSH from office (v2)");

    write.fail("Simulated firewall rule update error", 500);
    pending.await.unwrap().unwrap_err();

    assert_eq!(*client.read_entity(&RuleId::new("fw-1")).unwrap(), upstream[0]);
    assert_eq!(*sub.snapshot().data[0], upstream[0]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_reload_never_flashes_pre_mutation_value() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let all = QueryDescriptor::new();
    let mut sub = client.query(&all);
    script.next_fetch().await.ok(corpus());
    assert_eq!(sub.settled().await.unwrap().data.len(), 5);

    let fw1 = RuleId::new("fw-1");
    let shows_fw1_enabled = |snap: &QuerySnapshot| {
        snap.data.iter().find(|r| r.id == fw1).is_some_and(|r| r.enabled)
    };

    // Reload and mutation race; the reload was issued first and the
    // server answered it with pre-mutation data.
    let reload = sub.reload();
    let stale_reload = script.next_fetch().await;
    let pending = spawn_mutate(&client, "fw-1", RulePatch::enabled(false));
    let write = script.next_patch().await;
    assert!(!shows_fw1_enabled(&sub.snapshot()));

    // An unsubscribed query for allow rules was also issued before the
    // write committed.
    let allow = QueryDescriptor::new().with_action(RuleAction::Allow);
    let allow_fetch = client.fetch(&allow);
    let stale_allow = script.next_fetch().await;

    let mut server = corpus();
    server[0].enabled = false;
    write.ok(server[0].clone());
    pending.await.unwrap().unwrap();
    assert!(!shows_fw1_enabled(&sub.snapshot()));

    // Post-mutation invalidation supersedes the reload.
    let resync = script.next_fetch().await;
    assert_eq!(resync.query, all.canonical());

    stale_reload.ok(corpus());
    assert_eq!(reload.await.unwrap(), CommitOutcome::StaleDiscard);
    assert!(!shows_fw1_enabled(&sub.snapshot()));

    // The allow query still owns its key, so its list commits; the
    // confirmed row is not rolled back by its older copy of fw-1.
    stale_allow.ok(corpus().into_iter().filter(|r| r.action == RuleAction::Allow).collect());
    assert_eq!(allow_fetch.await.unwrap(), CommitOutcome::Applied);
    assert!(!client.read_entity(&fw1).unwrap().enabled);
    assert!(!shows_fw1_enabled(&sub.snapshot()));

    resync.ok(server.clone());
    let snap = sub.settled().await.unwrap();
    assert!(!shows_fw1_enabled(&snap));
    let shown: Vec<_> = snap.data.iter().map(|r| (**r).clone()).collect();
    assert_eq!(shown, server);
}

#[tokio::test(start_paused = true)]
async fn cancelled_write_rolls_back_its_patch() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(corpus());
    sub.settled().await.unwrap();
    let fw1 = RuleId::new("fw-1");

    let pending = spawn_mutate(&client, "fw-1", RulePatch::enabled(false));
    let _write = script.next_patch().await;
    assert!(!client.read_entity(&fw1).unwrap().enabled);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert_eq!(*client.read_entity(&fw1).unwrap(), corpus()[0]);
    assert_eq!(*sub.snapshot().data[0], corpus()[0]);

    // Later server data is not re-layered with the abandoned patch.
    let reload = sub.reload();
    script.next_fetch().await.ok(corpus());
    assert_eq!(reload.await.unwrap(), CommitOutcome::Applied);
    assert_eq!(*client.read_entity(&fw1).unwrap(), corpus()[0]);
    assert_eq!(*sub.snapshot().data[0], corpus()[0]);
}

#[tokio::test(start_paused = true)]
async fn timed_out_write_rolls_back_its_patch() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(corpus());
    sub.settled().await.unwrap();
    let fw2 = RuleId::new("fw-2");

    let write = client.mutate(&fw2, RulePatch::enabled(false), &[]);
    let (outcome, _patch) = tokio::join!(
        tokio::time::timeout(std::time::Duration::from_secs(5), write),
        script.next_patch(),
    );
    assert!(outcome.is_err());
    assert_eq!(*client.read_entity(&fw2).unwrap(), corpus()[1]);
}

#[tokio::test(start_paused = true)]
async fn write_answered_with_another_rule_is_a_conflict() {
    let (backend, mut script) = scripted();
    let client = client(backend);
    let mut sub = client.query(&QueryDescriptor::new());
    script.next_fetch().await.ok(corpus());
    sub.settled().await.unwrap();

    let pending = spawn_mutate(&client, "fw-1", RulePatch::enabled(false));
    let write = script.next_patch().await;
    write.ok(rule("fw-2", "Allow HTTPS inbound", RuleAction::Allow, false));

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::MutationConflict { ref id, .. } if id.as_str() == "fw-1"));
    assert_eq!(*client.read_entity(&RuleId::new("fw-1")).unwrap(), corpus()[0]);
    assert_eq!(*client.read_entity(&RuleId::new("fw-2")).unwrap(), corpus()[1]);

    // Rejections invalidate nothing.
    settle().await;
    script.assert_silent();
}
