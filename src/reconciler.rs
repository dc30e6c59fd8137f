//! Decide and apply the smallest safe change that brings one index to its
//! desired state.
//!
//! Index identity moves `Absent -> Creating -> Present -> Updating -> Present
//! -> Deleting -> Absent`. Every transition here is idempotent: a redelivered
//! event observes the effect of the earlier delivery in the live state and
//! settles on `NoOp` (or tolerates `AlreadyExists` / `NotFound`) instead of
//! repeating it.

use serde_json::Value;

use crate::client::{ClientError, Connector, SearchClient};
use crate::error::{ProvisionError, Result};
use crate::mapping::diff_mappings;
use crate::retry::{Deadline, RetryError, RetryPolicy};
use crate::types::{EventKind, IndexSpec, LiveIndexState, ReconcileStatus};

/// What the reconciler will do to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create the index with the full desired body.
    Create,
    /// Add new fields to the live mapping. `delta` is the `_mapping` body.
    UpdateMapping { delta: Value },
    NoOp,
    /// Identity changed and nothing exists under the new one yet: create it.
    /// The old index is left for the Delete the orchestrator sends for the
    /// stale identity.
    Replace,
    Delete,
}

/// Pure decision over desired, previous and live state.
///
/// Field type changes are refused with [`ProvisionError::MappingConflict`]
/// before anything is sent to the cluster.
pub fn determine_action(
    kind: EventKind,
    desired: &IndexSpec,
    previous: Option<&IndexSpec>,
    live: &LiveIndexState,
) -> Result<Action> {
    match kind {
        EventKind::Delete => Ok(Action::Delete),
        EventKind::Create => Ok(if live.exists {
            Action::NoOp
        } else {
            Action::Create
        }),
        EventKind::Update => {
            let replacing = previous.is_some_and(|prev| !prev.same_identity(desired));
            if !live.exists {
                // Either a fresh replacement, or an index deleted out of band
                // under an unchanged identity that needs bringing back.
                return Ok(if replacing {
                    Action::Replace
                } else {
                    Action::Create
                });
            }
            // An index already behind the new identity is adopted like any
            // live index: additive changes only.
            let diff = diff_mappings(&desired.body.mappings, &live.mapping);
            if diff.has_conflicts() {
                tracing::debug!(index = %desired.name, conflicts = ?diff.conflicts, "mapping conflicts");
                return Err(ProvisionError::MappingConflict {
                    index: desired.name.clone(),
                    detail: diff.conflict_detail(),
                });
            }
            if diff.additions.is_empty() {
                Ok(Action::NoOp)
            } else {
                Ok(Action::UpdateMapping {
                    delta: diff.delta(),
                })
            }
        }
    }
}

pub struct IndexReconciler<K: Connector> {
    connector: K,
    retry: RetryPolicy,
}

impl<K: Connector> IndexReconciler<K> {
    pub fn new(connector: K, retry: RetryPolicy) -> Self {
        Self { connector, retry }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Observe the live index behind `desired`, pick an action and apply it.
    /// Live state is fetched on every call and never cached.
    pub async fn reconcile(
        &self,
        kind: EventKind,
        desired: &IndexSpec,
        previous: Option<&IndexSpec>,
        deadline: Deadline,
    ) -> Result<ReconcileStatus> {
        let client = self
            .connector
            .connect(&desired.endpoint)
            .map_err(|e| ProvisionError::from_client("connect", &desired.name, e))?;
        let name = desired.name.as_str();

        let live = self
            .retry
            .run("get_index", deadline, || client.get_index(name))
            .await
            .map_err(|e| ProvisionError::from_retry("get_index", name, e))?;

        let action = determine_action(kind, desired, previous, &live)?;
        tracing::info!(
            index = name,
            endpoint = %desired.endpoint,
            event = %kind,
            exists = live.exists,
            action = action_label(&action),
            "reconciling index"
        );

        if kind == EventKind::Update && live.exists {
            warn_on_settings_drift(desired, &live);
        }

        let replacing = kind == EventKind::Update
            && previous.is_some_and(|prev| !prev.same_identity(desired));
        let changed = if replacing {
            ReconcileStatus::Replaced
        } else {
            ReconcileStatus::Updated
        };

        match action {
            Action::NoOp if replacing => Ok(ReconcileStatus::Replaced),
            Action::NoOp => Ok(ReconcileStatus::NoOp),
            Action::Create => {
                self.create(&client, desired, deadline).await?;
                Ok(match kind {
                    EventKind::Create => ReconcileStatus::Created,
                    _ => ReconcileStatus::Updated,
                })
            }
            Action::Replace => {
                self.create(&client, desired, deadline).await?;
                Ok(ReconcileStatus::Replaced)
            }
            Action::UpdateMapping { delta } => {
                self.put_mapping(&client, desired, &delta, deadline).await?;
                Ok(changed)
            }
            Action::Delete => {
                if live.exists {
                    self.delete(&client, name, deadline).await?;
                } else {
                    tracing::info!(index = name, "index already absent, nothing to delete");
                }
                Ok(ReconcileStatus::Deleted)
            }
        }
    }

    async fn create(
        &self,
        client: &K::Client,
        desired: &IndexSpec,
        deadline: Deadline,
    ) -> Result<()> {
        let name = desired.name.as_str();
        match self
            .retry
            .run("create", deadline, || client.create(name, &desired.body))
            .await
        {
            Ok(()) => Ok(()),
            // An earlier delivery, or an attempt whose response was lost, got there first.
            Err(RetryError::Failed(ClientError::AlreadyExists(reason))) => {
                tracing::info!(index = name, %reason, "index already exists, treating create as done");
                Ok(())
            }
            Err(e) => Err(ProvisionError::from_retry("create", name, e)),
        }
    }

    async fn put_mapping(
        &self,
        client: &K::Client,
        desired: &IndexSpec,
        delta: &Value,
        deadline: Deadline,
    ) -> Result<()> {
        let name = desired.name.as_str();
        match self
            .retry
            .run("put_mapping", deadline, || client.put_mapping(name, delta))
            .await
        {
            Ok(()) => Ok(()),
            // Deleted between the GET and the PUT; the full body covers the delta.
            Err(RetryError::Failed(ClientError::NotFound(reason))) => {
                tracing::warn!(index = name, %reason, "index vanished before mapping update, recreating");
                self.create(client, desired, deadline).await
            }
            Err(e) => Err(ProvisionError::from_retry("put_mapping", name, e)),
        }
    }

    async fn delete(&self, client: &K::Client, name: &str, deadline: Deadline) -> Result<()> {
        match self
            .retry
            .run("delete", deadline, || client.delete(name))
            .await
        {
            Ok(()) => Ok(()),
            Err(RetryError::Failed(ClientError::NotFound(_))) => {
                tracing::info!(index = name, "index vanished before delete, treating as done");
                Ok(())
            }
            Err(e) => Err(ProvisionError::from_retry("delete", name, e)),
        }
    }
}

fn action_label(action: &Action) -> &'static str {
    match action {
        Action::Create => "create",
        Action::UpdateMapping { .. } => "update_mapping",
        Action::NoOp => "no_op",
        Action::Replace => "replace",
        Action::Delete => "delete",
    }
}

/// Settings are applied at creation only. Report keys whose live value
/// differs so an operator can act; never mutate.
fn warn_on_settings_drift(desired: &IndexSpec, live: &LiveIndexState) {
    let live_index_settings = live
        .settings
        .get("index")
        .and_then(Value::as_object)
        .unwrap_or(&live.settings);

    for (key, want) in &desired.body.settings {
        let key = key.strip_prefix("index.").unwrap_or(key);
        if key == "index" {
            continue;
        }
        let Some(have) = live_index_settings.get(key) else {
            continue;
        };
        // Engines echo settings back as strings.
        let same = match (want, have) {
            (Value::String(a), Value::String(b)) => a == b,
            (other, Value::String(b)) => other.to_string() == *b,
            (a, b) => a == b,
        };
        if !same {
            tracing::warn!(
                index = %desired.name,
                setting = key,
                desired = %want,
                live = %have,
                "index setting differs from desired value; settings are applied at creation only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClusters;
    use crate::config::RetrySettings;
    use crate::types::IndexBody;
    use serde_json::{json, Map};
    use std::time::Duration;

    const ENDPOINT: &str = "https://search.internal";

    fn body(mappings: Value) -> IndexBody {
        IndexBody {
            mappings: mappings.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    fn spec(name: &str, mappings: Value) -> IndexSpec {
        IndexSpec::new(name, body(mappings), ENDPOINT)
    }

    fn live(mappings: Value) -> LiveIndexState {
        LiveIndexState::present(mappings.as_object().cloned().unwrap(), Map::new())
    }

    fn reconciler(clusters: &MemoryClusters) -> IndexReconciler<MemoryClusters> {
        IndexReconciler::new(
            clusters.clone(),
            RetryPolicy::from_settings(&RetrySettings {
                jitter: 0.0,
                ..RetrySettings::default()
            }),
        )
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(300))
    }

    // ── determine_action ──

    #[test]
    fn create_on_absent_creates() {
        let desired = spec("logs", json!({}));
        assert_eq!(
            determine_action(EventKind::Create, &desired, None, &LiveIndexState::absent()).unwrap(),
            Action::Create
        );
    }

    #[test]
    fn create_on_present_is_noop() {
        let desired = spec("logs", json!({}));
        assert_eq!(
            determine_action(EventKind::Create, &desired, None, &live(json!({}))).unwrap(),
            Action::NoOp
        );
    }

    #[test]
    fn update_with_new_field_adds_only_delta() {
        let prev = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        let desired = spec(
            "logs",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        let action = determine_action(
            EventKind::Update,
            &desired,
            Some(&prev),
            &live(json!({"properties": {"time": {"type": "date"}}})),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::UpdateMapping {
                delta: json!({"properties": {"level": {"type": "keyword"}}})
            }
        );
    }

    #[test]
    fn update_diffs_against_live_not_previous() {
        // previous lacks "level" but the live index already has it (earlier delivery landed).
        let prev = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        let desired = spec(
            "logs",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        let action = determine_action(
            EventKind::Update,
            &desired,
            Some(&prev),
            &live(json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}})),
        )
        .unwrap();
        assert_eq!(action, Action::NoOp);
    }

    #[test]
    fn update_with_type_change_is_conflict() {
        let prev = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        let desired = spec("logs", json!({"properties": {"time": {"type": "keyword"}}}));
        let err = determine_action(
            EventKind::Update,
            &desired,
            Some(&prev),
            &live(json!({"properties": {"time": {"type": "date"}}})),
        )
        .unwrap_err();
        match err {
            ProvisionError::MappingConflict { index, detail } => {
                assert_eq!(index, "logs");
                assert!(detail.contains("'time'"), "{detail}");
            }
            other => panic!("expected MappingConflict, got {other:?}"),
        }
    }

    #[test]
    fn update_with_changed_name_or_endpoint_replaces() {
        let prev = spec("logs", json!({}));
        let renamed = spec("logs-v2", json!({}));
        let moved = IndexSpec::new("logs", IndexBody::default(), "https://other.internal");
        for desired in [renamed, moved] {
            assert_eq!(
                determine_action(
                    EventKind::Update,
                    &desired,
                    Some(&prev),
                    &LiveIndexState::absent()
                )
                .unwrap(),
                Action::Replace
            );
        }
    }

    #[test]
    fn update_on_missing_index_recreates() {
        let prev = spec("logs", json!({}));
        let desired = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        assert_eq!(
            determine_action(
                EventKind::Update,
                &desired,
                Some(&prev),
                &LiveIndexState::absent()
            )
            .unwrap(),
            Action::Create
        );
    }

    #[test]
    fn delete_is_delete_regardless_of_live_state() {
        let desired = spec("logs", json!({}));
        for state in [LiveIndexState::absent(), live(json!({}))] {
            assert_eq!(
                determine_action(EventKind::Delete, &desired, None, &state).unwrap(),
                Action::Delete
            );
        }
    }

    // ── reconcile against the in-memory cluster ──

    #[tokio::test(start_paused = true)]
    async fn create_twice_creates_once() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let desired = spec("logs", json!({"properties": {"time": {"type": "date"}}}));

        let first = r
            .reconcile(EventKind::Create, &desired, None, deadline())
            .await
            .unwrap();
        let second = r
            .reconcile(EventKind::Create, &desired, None, deadline())
            .await
            .unwrap();

        assert_eq!(first, ReconcileStatus::Created);
        assert_eq!(second, ReconcileStatus::NoOp);
        let cluster = clusters.cluster(ENDPOINT);
        assert_eq!(cluster.count_calls("PUT /logs"), 1);
        assert_eq!(cluster.index_names(), vec!["logs".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn create_retries_through_cold_start() {
        let clusters = MemoryClusters::new();
        let cluster = clusters.cluster(ENDPOINT);
        for _ in 0..3 {
            cluster.fail_next(ClientError::Transport("connection refused".into()));
        }
        let desired = spec("logs", json!({}));
        let status = reconciler(&clusters)
            .reconcile(EventKind::Create, &desired, None, deadline())
            .await
            .unwrap();
        assert_eq!(status, ReconcileStatus::Created);
        assert_eq!(cluster.count_calls("GET /logs"), 4);
        assert!(cluster.exists("logs").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn create_tolerates_already_exists_race() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let cluster = clusters.cluster(ENDPOINT);
        // Another delivery created the index between our GET and PUT.
        cluster.create("logs", &IndexBody::default()).await.unwrap();
        r.create(&cluster, &spec("logs", json!({})), deadline())
            .await
            .unwrap();
        assert_eq!(cluster.count_calls("PUT /logs"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn update_conflict_leaves_live_mapping_untouched() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let original = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        r.reconcile(EventKind::Create, &original, None, deadline())
            .await
            .unwrap();

        let changed = spec(
            "logs",
            json!({"properties": {"time": {"type": "keyword"}, "level": {"type": "keyword"}}}),
        );
        let err = r
            .reconcile(EventKind::Update, &changed, Some(&original), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MappingConflict { .. }));

        let cluster = clusters.cluster(ENDPOINT);
        assert_eq!(cluster.count_calls("PUT /logs/_mapping"), 0);
        let mapping = cluster.mapping("logs").unwrap();
        assert_eq!(mapping["properties"]["time"]["type"], "date");
        assert!(mapping["properties"].get("level").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replace_creates_new_identity_and_keeps_old() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let old = spec("logs", json!({}));
        r.reconcile(EventKind::Create, &old, None, deadline())
            .await
            .unwrap();

        let new = spec("logs-v2", json!({}));
        let status = r
            .reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap();
        assert_eq!(status, ReconcileStatus::Replaced);
        assert_eq!(
            clusters.cluster(ENDPOINT).index_names(),
            vec!["logs".to_string(), "logs-v2".to_string()]
        );

        // Redelivery of the same replacement does not create again.
        r.reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap();
        assert_eq!(clusters.cluster(ENDPOINT).count_calls("PUT /logs-v2"), 1);
    }

    #[test]
    fn replace_onto_existing_index_is_diffed() {
        let prev = spec("logs", json!({}));
        let live_v2 = live(json!({"properties": {"time": {"type": "date"}}}));

        let additive = spec(
            "logs-v2",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        assert_eq!(
            determine_action(EventKind::Update, &additive, Some(&prev), &live_v2).unwrap(),
            Action::UpdateMapping {
                delta: json!({"properties": {"level": {"type": "keyword"}}})
            }
        );

        let retyped = spec("logs-v2", json!({"properties": {"time": {"type": "keyword"}}}));
        assert!(matches!(
            determine_action(EventKind::Update, &retyped, Some(&prev), &live_v2),
            Err(ProvisionError::MappingConflict { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn replace_adopts_existing_index_and_adds_fields() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let cluster = clusters.cluster(ENDPOINT);
        cluster
            .create("logs-v2", &body(json!({"properties": {"time": {"type": "date"}}})))
            .await
            .unwrap();

        let old = spec("logs", json!({}));
        let new = spec(
            "logs-v2",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        let status = r
            .reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap();
        assert_eq!(status, ReconcileStatus::Replaced);
        assert_eq!(
            cluster.mapping("logs-v2").unwrap()["properties"]["level"]["type"],
            "keyword"
        );

        // Redelivery finds nothing left to add.
        let again = r
            .reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap();
        assert_eq!(again, ReconcileStatus::Replaced);
        assert_eq!(cluster.count_calls("PUT /logs-v2/_mapping"), 1);
        assert_eq!(cluster.count_calls("PUT /logs-v2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_onto_existing_index_with_type_change_is_conflict() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let cluster = clusters.cluster(ENDPOINT);
        cluster
            .create("logs-v2", &body(json!({"properties": {"time": {"type": "date"}}})))
            .await
            .unwrap();

        let old = spec("logs", json!({}));
        let new = spec(
            "logs-v2",
            json!({"properties": {"time": {"type": "keyword"}, "level": {"type": "keyword"}}}),
        );
        let err = r
            .reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MappingConflict { .. }), "{err:?}");
        assert_eq!(cluster.count_calls("PUT /logs-v2/_mapping"), 0);
        assert!(cluster.mapping("logs-v2").unwrap()["properties"]
            .get("level")
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn mapping_update_on_vanished_index_recreates_it() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let cluster = clusters.cluster(ENDPOINT);
        // The GET saw the index; it is gone by the time the PUT lands.
        let desired = spec(
            "logs",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        r.put_mapping(
            &cluster,
            &desired,
            &json!({"properties": {"level": {"type": "keyword"}}}),
            deadline(),
        )
        .await
        .unwrap();

        assert_eq!(cluster.count_calls("PUT /logs/_mapping"), 1);
        assert_eq!(cluster.count_calls("PUT /logs"), 1);
        let mapping = cluster.mapping("logs").unwrap();
        assert_eq!(mapping["properties"]["time"]["type"], "date");
        assert_eq!(mapping["properties"]["level"]["type"], "keyword");
    }

    #[tokio::test(start_paused = true)]
    async fn replace_to_new_endpoint_uses_new_cluster() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let old = spec("logs", json!({}));
        let new = IndexSpec::new("logs", IndexBody::default(), "https://other.internal");
        r.reconcile(EventKind::Create, &old, None, deadline())
            .await
            .unwrap();
        r.reconcile(EventKind::Update, &new, Some(&old), deadline())
            .await
            .unwrap();
        assert!(clusters.cluster("https://other.internal").exists("logs").await.unwrap());
        assert!(clusters.cluster(ENDPOINT).exists("logs").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_absent_index_succeeds_without_delete_call() {
        let clusters = MemoryClusters::new();
        let status = reconciler(&clusters)
            .reconcile(EventKind::Delete, &spec("logs", json!({})), None, deadline())
            .await
            .unwrap();
        assert_eq!(status, ReconcileStatus::Deleted);
        assert_eq!(clusters.cluster(ENDPOINT).count_calls("DELETE /logs"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_tolerates_concurrent_removal() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let cluster = clusters.cluster(ENDPOINT);
        cluster.create("logs", &IndexBody::default()).await.unwrap();
        cluster.delete("logs").await.unwrap();
        r.delete(&cluster, "logs", deadline()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transport_failure_is_timeout() {
        let clusters = MemoryClusters::new();
        let cluster = clusters.cluster(ENDPOINT);
        for _ in 0..20 {
            cluster.fail_next(ClientError::Transport("connection refused".into()));
        }
        let err = reconciler(&clusters)
            .reconcile(EventKind::Create, &spec("logs", json!({})), None, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { attempts: 8, .. }), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn update_retries_transient_then_adds_field() {
        let clusters = MemoryClusters::new();
        let r = reconciler(&clusters);
        let original = spec("logs", json!({"properties": {"time": {"type": "date"}}}));
        r.reconcile(EventKind::Create, &original, None, deadline())
            .await
            .unwrap();

        let cluster = clusters.cluster(ENDPOINT);
        cluster.fail_next(ClientError::Unavailable {
            status: 503,
            reason: "cluster warming up".into(),
        });
        let desired = spec(
            "logs",
            json!({"properties": {"time": {"type": "date"}, "level": {"type": "keyword"}}}),
        );
        let status = r
            .reconcile(EventKind::Update, &desired, Some(&original), deadline())
            .await
            .unwrap();
        assert_eq!(status, ReconcileStatus::Updated);
        assert_eq!(cluster.count_calls("PUT /logs/_mapping"), 1);
        assert_eq!(
            cluster.mapping("logs").unwrap()["properties"]["level"]["type"],
            "keyword"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_cluster_error_is_not_retried() {
        let clusters = MemoryClusters::new();
        let cluster = clusters.cluster(ENDPOINT);
        cluster.fail_next(ClientError::Rejected {
            status: 403,
            reason: "no permissions for [indices:admin/get]".into(),
        });
        let err = reconciler(&clusters)
            .reconcile(EventKind::Create, &spec("logs", json!({})), None, deadline())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProvisionError::Rejected { status: 403, .. }),
            "{err:?}"
        );
        assert!(!err.is_retryable());
        assert_eq!(cluster.count_calls("GET /logs"), 1);
        assert_eq!(cluster.count_calls("PUT /logs"), 0);
    }
}
