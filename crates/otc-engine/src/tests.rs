use super::*;
use crate::test_support::offline_config;
use async_trait::async_trait;
use otc_client::{ApiError, ConfigSource};
use otc_core::{
    AttrMap, AttrType, Attribute, ErrorKind, ImportPath, ResourceSchema, Tag, TagMap, TagMode,
    Value,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct RemoteVpc {
    name: String,
    cidr: String,
    status: String,
    settles_to: String,
    polls_left: u32,
    tags: TagMap,
}

#[derive(Debug, Default)]
struct CloudState {
    vpcs: BTreeMap<String, RemoteVpc>,
    members: BTreeMap<(String, String), String>,
    next_id: u32,
    /// polls answering `CREATING` before a new vpc settles.
    pending_polls: u32,
    /// status a new vpc settles in.
    settles_to: Option<String>,
    /// throttled create calls before one succeeds.
    throttled_creates: u32,
    /// reads answering 404 right after creation.
    missing_reads: u32,
    fail_update: bool,
    tag_writes: u32,
    /// time each status poll takes to answer.
    poll_latency: Duration,
}

type Cloud = Arc<Mutex<CloudState>>;

fn lock(cloud: &Cloud) -> MutexGuard<'_, CloudState> {
    cloud.lock().unwrap()
}

fn not_found(what: &str) -> ProviderError {
    ProviderError::Client(ApiError::not_found(format!("{what} not found")).into())
}

struct FakeTags {
    cloud: Cloud,
    id: String,
}

#[async_trait]
impl TagService for FakeTags {
    async fn list(&self) -> Result<TagMap, ProviderError> {
        let cloud = lock(&self.cloud);
        let vpc = cloud.vpcs.get(&self.id).ok_or_else(|| not_found("vpc"))?;
        Ok(vpc.tags.clone())
    }

    async fn delete(&self, tags: &[Tag]) -> Result<(), ProviderError> {
        let mut cloud = lock(&self.cloud);
        if !tags.is_empty() {
            cloud.tag_writes += 1;
        }
        let vpc = cloud.vpcs.get_mut(&self.id).ok_or_else(|| not_found("vpc"))?;
        for tag in tags {
            vpc.tags.remove(&tag.key);
        }
        Ok(())
    }

    async fn create(&self, tags: &[Tag]) -> Result<(), ProviderError> {
        let mut cloud = lock(&self.cloud);
        if !tags.is_empty() {
            cloud.tag_writes += 1;
        }
        let vpc = cloud.vpcs.get_mut(&self.id).ok_or_else(|| not_found("vpc"))?;
        for tag in tags {
            vpc.tags.insert(tag.key.clone(), tag.value.clone());
        }
        Ok(())
    }
}

struct FakeVpc {
    cloud: Cloud,
}

impl FakeVpc {
    fn poll(&self, id: &str) -> Result<Option<Observed<()>>, ProviderError> {
        let mut cloud = lock(&self.cloud);
        let Some(vpc) = cloud.vpcs.get_mut(id) else {
            return Ok(None);
        };
        if vpc.polls_left > 0 {
            vpc.polls_left -= 1;
        } else {
            vpc.status = vpc.settles_to.clone();
        }
        Ok(Some(Observed::new((), vpc.status.clone())))
    }

    fn tags(&self, id: &str) -> FakeTags {
        FakeTags {
            cloud: self.cloud.clone(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl Resource for FakeVpc {
    fn type_name(&self) -> &'static str {
        "otc_vpc_v1"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .attribute("name", Attribute::required(AttrType::String))
            .attribute("cidr", Attribute::required(AttrType::String).force_new())
            .attribute("status", Attribute::computed(AttrType::String))
            .attribute(
                "region",
                Attribute::optional_computed(AttrType::String).force_new(),
            )
            .attribute("tags", Attribute::optional(AttrType::map(AttrType::String)))
            .attribute(
                "secret",
                Attribute::optional(AttrType::String).sensitive().write_only(),
            )
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let name = data.require_str("name")?.to_string();
        let cidr = data.require_str("cidr")?.to_string();
        let id = {
            let mut cloud = lock(&self.cloud);
            if cloud.throttled_creates > 0 {
                cloud.throttled_creates -= 1;
                return Err(ProviderError::Client(
                    ApiError::new(ErrorKind::RateLimited, "slow down").into(),
                ));
            }
            cloud.next_id += 1;
            let id = format!("v-{}", cloud.next_id);
            let polls = cloud.pending_polls;
            let settles_to = cloud.settles_to.clone().unwrap_or_else(|| "OK".to_string());
            cloud.vpcs.insert(
                id.clone(),
                RemoteVpc {
                    name,
                    cidr,
                    status: "CREATING".to_string(),
                    settles_to,
                    polls_left: polls,
                    tags: TagMap::new(),
                },
            );
            id
        };
        data.set_id(id.clone());

        WaitForState::new(&["CREATING"], &["OK"], ctx.remaining())
            .wait(ctx, || {
                let observed = self.poll(&id);
                let latency = lock(&self.cloud).poll_latency;
                async move {
                    tokio::time::sleep(latency).await;
                    observed
                }
            })
            .await?;

        let declared = data.get_tags("tags");
        reconcile_tags(&self.tags(&id), &declared, &TagMap::new(), TagMode::Managed).await?;
        Ok(())
    }

    async fn read(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let found = {
            let mut cloud = lock(&self.cloud);
            if cloud.missing_reads > 0 {
                cloud.missing_reads -= 1;
                return Err(not_found("vpc"));
            }
            cloud.vpcs.get(data.id()).cloned()
        };
        let Some(vpc) = found else {
            return check_deleted(data, not_found("vpc"), "vpc");
        };
        data.set("name", vpc.name);
        data.set("cidr", vpc.cidr);
        data.set("status", vpc.status);
        data.set("region", "eu-de");
        data.set("tags", Value::from(vpc.tags));
        Ok(())
    }

    async fn update(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let id = data.id().to_string();
        if data.has_change("name") {
            let name = data.require_str("name")?.to_string();
            let mut cloud = lock(&self.cloud);
            let fail = cloud.fail_update;
            let vpc = cloud.vpcs.get_mut(&id).ok_or_else(|| not_found("vpc"))?;
            vpc.name = name;
            if fail {
                return Err(ProviderError::Client(
                    ApiError::new(ErrorKind::ValidationFailed, "tag quota exceeded").into(),
                ));
            }
        }
        if data.has_change("tags") {
            let prior = otc_core::tags_from_value(data.get_old("tags"));
            reconcile_tags(&self.tags(&id), &data.get_tags("tags"), &prior, TagMode::Managed)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let mut cloud = lock(&self.cloud);
        match cloud.vpcs.remove(data.id()) {
            Some(_) => Ok(()),
            None => Err(not_found("vpc")),
        }
    }
}

struct FakeMember {
    cloud: Cloud,
}

#[async_trait]
impl Resource for FakeMember {
    fn type_name(&self) -> &'static str {
        "otc_lb_member_v2"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .attribute("pool_id", Attribute::required(AttrType::String).force_new())
            .attribute("address", Attribute::required(AttrType::String).force_new())
            .attribute("member_id", Attribute::computed(AttrType::String))
    }

    fn import_path(&self) -> Option<ImportPath> {
        Some(ImportPath::new(&["pool_id", "member_id"]))
    }

    async fn create(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let pool = data.require_str("pool_id")?.to_string();
        let address = data.require_str("address")?.to_string();
        let member = {
            let mut cloud = lock(&self.cloud);
            cloud.next_id += 1;
            let member = format!("m-{}", cloud.next_id);
            cloud.members.insert((pool, member.clone()), address);
            member
        };
        data.set("member_id", member);
        let id = ImportPath::new(&["pool_id", "member_id"]).build(data.attributes())?;
        data.set_id(id);
        Ok(())
    }

    async fn read(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let pool = data.require_str("pool_id")?.to_string();
        let member = data.require_str("member_id")?.to_string();
        let address = lock(&self.cloud).members.get(&(pool, member)).cloned();
        match address {
            Some(address) => {
                data.set("address", address);
                Ok(())
            }
            None => check_deleted(data, not_found("member"), "member"),
        }
    }

    async fn delete(&self, _ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let pool = data.require_str("pool_id")?.to_string();
        let member = data.require_str("member_id")?.to_string();
        match lock(&self.cloud).members.remove(&(pool, member)) {
            Some(_) => Ok(()),
            None => Err(not_found("member")),
        }
    }
}

struct Fixture {
    cloud: Cloud,
    root: CancellationToken,
    dispatcher: Dispatcher,
}

fn fixture() -> Fixture {
    let root = CancellationToken::new();
    Fixture {
        cloud: Cloud::default(),
        dispatcher: Dispatcher::new(offline_config(), root.clone()),
        root,
    }
}

impl Fixture {
    fn vpc(&self) -> FakeVpc {
        FakeVpc {
            cloud: self.cloud.clone(),
        }
    }

    fn member(&self) -> FakeMember {
        FakeMember {
            cloud: self.cloud.clone(),
        }
    }

    fn registry(&self) -> Registry {
        Registry::new().register(self.vpc()).register(self.member())
    }
}

fn attrs(value: serde_json::Value) -> AttrMap {
    serde_json::from_value(value).unwrap()
}

fn vpc_config() -> AttrMap {
    attrs(json!({
        "name": "vpc-1",
        "cidr": "192.168.0.0/16",
        "secret": "hunter2",
        "tags": {"muh": "value-create", "kuh": "value-create"}
    }))
}

#[tokio::test(start_paused = true)]
async fn async_create_waits_for_ready_and_reads_back() {
    let fx = fixture();
    lock(&fx.cloud).pending_polls = 3;
    let outcome = fx.dispatcher.create(&fx.vpc(), vpc_config()).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    let state = outcome.state.unwrap();
    assert_eq!(state.id, "v-1");
    assert_eq!(state.get("status"), Some(&Value::from("OK")));
    assert_eq!(state.get("region"), Some(&Value::from("eu-de")));
    for (name, value) in vpc_config() {
        assert_eq!(state.get(&name), Some(&value), "attribute {name}");
    }
}

#[tokio::test(start_paused = true)]
async fn reapplying_the_same_config_plans_nothing() {
    let fx = fixture();
    let vpc = fx.vpc();
    let config = vpc_config();
    let created = fx
        .dispatcher
        .create(&vpc, config.clone())
        .await
        .into_result()
        .unwrap()
        .unwrap();
    let refreshed = fx.dispatcher.read(&vpc, &created).await.unwrap().unwrap();
    let change = plan_change(&vpc.schema(), Some(&refreshed), Some(&config));
    assert_eq!(change.action, Action::NoOp, "{:?}", change.changes);
}

#[tokio::test(start_paused = true)]
async fn transient_create_errors_are_retried() {
    let fx = fixture();
    lock(&fx.cloud).throttled_creates = 2;
    let outcome = fx.dispatcher.create(&fx.vpc(), vpc_config()).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(lock(&fx.cloud).vpcs.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn read_after_create_tolerates_brief_not_found() {
    let fx = fixture();
    lock(&fx.cloud).missing_reads = 2;
    let outcome = fx.dispatcher.create(&fx.vpc(), vpc_config()).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.state.unwrap().id, "v-1");
}

#[tokio::test(start_paused = true)]
async fn failed_create_after_id_is_tainted() {
    let fx = fixture();
    {
        let mut cloud = lock(&fx.cloud);
        cloud.pending_polls = 1;
        cloud.settles_to = Some("ERROR".to_string());
    }
    let outcome = fx.dispatcher.create(&fx.vpc(), vpc_config()).await;
    let error = outcome.error.unwrap();
    assert_eq!(error.kind(), ErrorKind::UnexpectedState);
    assert!(error.to_string().starts_with("create otc_vpc_v1 (v-1):"));
    let state = outcome.state.unwrap();
    assert!(state.tainted);
    assert_eq!(state.id, "v-1");
}

#[tokio::test(start_paused = true)]
async fn create_gives_up_at_its_deadline() {
    let fx = fixture();
    lock(&fx.cloud).pending_polls = u32::MAX;
    let mut config = vpc_config();
    config.insert(
        "timeouts".to_string(),
        Value::Map(BTreeMap::from([("create".to_string(), Value::from("2m"))])),
    );
    let started = tokio::time::Instant::now();
    let outcome = fx.dispatcher.create(&fx.vpc(), config).await;
    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::PollTimeout);
    assert!(started.elapsed() <= Duration::from_secs(130));
    assert!(outcome.state.unwrap().tainted);
}

#[tokio::test(start_paused = true)]
async fn slow_polls_at_the_deadline_report_poll_timeout() {
    let fx = fixture();
    {
        let mut cloud = lock(&fx.cloud);
        cloud.pending_polls = u32::MAX;
        cloud.poll_latency = Duration::from_millis(50);
    }
    let mut config = vpc_config();
    config.insert(
        "timeouts".to_string(),
        Value::Map(BTreeMap::from([("create".to_string(), Value::from("2m"))])),
    );
    let outcome = fx.dispatcher.create(&fx.vpc(), config).await;
    let error = outcome.error.unwrap();
    assert_eq!(error.kind(), ErrorKind::PollTimeout, "{error}");
    assert!(outcome.state.unwrap().tainted);
}

#[tokio::test(start_paused = true)]
async fn out_of_band_delete_clears_state_on_read() {
    let fx = fixture();
    let vpc = fx.vpc();
    let state = fx
        .dispatcher
        .create(&vpc, vpc_config())
        .await
        .into_result()
        .unwrap()
        .unwrap();
    lock(&fx.cloud).vpcs.clear();
    assert_eq!(fx.dispatcher.read(&vpc, &state).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn delete_is_idempotent() {
    let fx = fixture();
    let vpc = fx.vpc();
    let state = fx
        .dispatcher
        .create(&vpc, vpc_config())
        .await
        .into_result()
        .unwrap()
        .unwrap();
    fx.dispatcher.delete(&vpc, &state).await.unwrap();
    fx.dispatcher.delete(&vpc, &state).await.unwrap();
    assert!(lock(&fx.cloud).vpcs.is_empty());

    let outcome = fx.dispatcher.apply(&vpc, Some(&state), None).await;
    assert!(outcome.is_ok());
    assert!(outcome.state.is_none());
}

#[tokio::test(start_paused = true)]
async fn tag_update_converges_remote_tags() {
    let fx = fixture();
    let vpc = fx.vpc();
    let state = fx
        .dispatcher
        .create(&vpc, vpc_config())
        .await
        .into_result()
        .unwrap()
        .unwrap();

    let mut config = vpc_config();
    config.insert(
        "tags".to_string(),
        Value::from(BTreeMap::from([(
            "muh".to_string(),
            "value-update".to_string(),
        )])),
    );
    let planned = plan_change(&vpc.schema(), Some(&state), Some(&config));
    assert_eq!(planned.action, Action::Update);
    let updated = fx
        .dispatcher
        .apply(&vpc, Some(&state), planned.planned)
        .await
        .into_result()
        .unwrap()
        .unwrap();

    let expected = BTreeMap::from([("muh".to_string(), "value-update".to_string())]);
    assert_eq!(lock(&fx.cloud).vpcs["v-1"].tags, expected);
    assert_eq!(updated.get("tags"), Some(&Value::from(expected)));

    let writes = lock(&fx.cloud).tag_writes;
    let again = plan_change(&vpc.schema(), Some(&updated), Some(&config));
    assert!(again.is_noop());
    let outcome = fx.dispatcher.apply(&vpc, Some(&updated), again.planned).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(lock(&fx.cloud).tag_writes, writes);
}

#[tokio::test(start_paused = true)]
async fn failed_update_returns_refreshed_state() {
    let fx = fixture();
    let vpc = fx.vpc();
    let state = fx
        .dispatcher
        .create(&vpc, vpc_config())
        .await
        .into_result()
        .unwrap()
        .unwrap();
    lock(&fx.cloud).fail_update = true;

    let mut planned = state.attributes.clone();
    planned.insert("name".to_string(), Value::from("vpc-2"));
    let outcome = fx.dispatcher.update(&vpc, &state, planned).await;
    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::ValidationFailed);
    let refreshed = outcome.state.unwrap();
    assert_eq!(refreshed.get("name"), Some(&Value::from("vpc-2")));
    assert_eq!(refreshed.get("secret"), Some(&Value::from("hunter2")));
}

#[tokio::test(start_paused = true)]
async fn composite_import_splits_the_id() {
    let fx = fixture();
    lock(&fx.cloud)
        .members
        .insert(("P".to_string(), "M".to_string()), "10.0.0.5".to_string());
    let state = fx.dispatcher.import(&fx.member(), "P/M").await.unwrap();
    assert_eq!(state.id, "P/M");
    assert_eq!(state.get("pool_id"), Some(&Value::from("P")));
    assert_eq!(state.get("member_id"), Some(&Value::from("M")));
    assert_eq!(state.get("address"), Some(&Value::from("10.0.0.5")));
}

#[tokio::test(start_paused = true)]
async fn import_reproduces_created_state() {
    let fx = fixture();
    let member = fx.member();
    let created = fx
        .dispatcher
        .create(&member, attrs(json!({"pool_id": "P", "address": "10.0.0.7"})))
        .await
        .into_result()
        .unwrap()
        .unwrap();
    let imported = fx.dispatcher.import(&member, &created.id).await.unwrap();
    assert_eq!(imported, created);
}

#[tokio::test(start_paused = true)]
async fn import_rejects_bad_ids_and_missing_objects() {
    let fx = fixture();
    let err = fx.dispatcher.import(&fx.member(), "only-one").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.to_string().contains("pool_id/member_id"));

    let err = fx.dispatcher.import(&fx.member(), "P/gone").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_operations() {
    let fx = fixture();
    lock(&fx.cloud).pending_polls = u32::MAX;
    let vpc = Arc::new(fx.vpc());
    let task = {
        let dispatcher = fx.dispatcher.clone();
        let vpc = vpc.clone();
        tokio::spawn(async move { dispatcher.create(vpc.as_ref(), vpc_config()).await })
    };
    tokio::time::sleep(Duration::from_secs(30)).await;
    fx.root.cancel();
    let outcome = task.await.unwrap();
    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::Cancelled);
}

fn provider(fx: &Fixture) -> Arc<Provider> {
    let provider = Provider::new(fx.registry(), ConfigSource::new());
    provider.install(offline_config());
    Arc::new(provider)
}

#[tokio::test(start_paused = true)]
async fn protocol_apply_and_read_round_trip() {
    let fx = fixture();
    let provider = provider(&fx);
    let plan = handle_line(
        &provider,
        &json!({"id": 1, "method": "PlanResourceChange", "params": {
            "type_name": "otc_vpc_v1",
            "config": {"name": "vpc-1", "cidr": "192.168.0.0/16"}
        }})
        .to_string(),
    )
    .await;
    assert_eq!(plan["result"]["action"], "create");

    let applied = handle_line(
        &provider,
        &json!({"id": 2, "method": "ApplyResourceChange", "params": {
            "type_name": "otc_vpc_v1",
            "planned_state": plan["result"]["planned"]
        }})
        .to_string(),
    )
    .await;
    assert_eq!(applied["id"], 2);
    assert_eq!(applied["result"]["error"], serde_json::Value::Null);
    let new_state = applied["result"]["new_state"].clone();
    assert_eq!(new_state["id"], "v-1");

    let read = handle_line(
        &provider,
        &json!({"id": 3, "method": "ReadResource", "params": {
            "type_name": "otc_vpc_v1",
            "current_state": new_state
        }})
        .to_string(),
    )
    .await;
    assert_eq!(read["result"]["new_state"]["attributes"]["status"], "OK");
}

#[tokio::test]
async fn protocol_reports_errors_with_kind() {
    let fx = fixture();
    let provider = provider(&fx);

    let invalid = handle_line(
        &provider,
        &json!({"id": 1, "method": "ValidateResourceConfig", "params": {
            "type_name": "otc_vpc_v1",
            "config": {"name": "vpc-1", "colour": "red"}
        }})
        .to_string(),
    )
    .await;
    assert_eq!(invalid["error"]["kind"], "VALIDATION_FAILED");
    let message = invalid["error"]["message"].as_str().unwrap();
    assert!(message.contains("cidr"), "{message}");
    assert!(message.contains("colour"), "{message}");

    let unknown = handle_line(&provider, r#"{"id": 2, "method": "Frobnicate"}"#).await;
    assert_eq!(unknown["error"]["kind"], "VALIDATION_FAILED");

    let garbage = handle_line(&provider, "not json").await;
    assert_eq!(garbage["id"], serde_json::Value::Null);

    let unconfigured = Provider::new(fx.registry(), ConfigSource::new());
    let response = handle_line(
        &unconfigured,
        &json!({"id": 3, "method": "ImportResourceState", "params": {
            "type_name": "otc_vpc_v1", "id": "v-1"
        }})
        .to_string(),
    )
    .await;
    assert_eq!(response["error"]["kind"], "CLIENT_INIT_FAILED");
}

#[tokio::test]
async fn serve_answers_every_line() {
    let fx = fixture();
    let provider = provider(&fx);
    let input = concat!(
        r#"{"id": 1, "method": "GetProviderSchema"}"#,
        "\n\n",
        r#"{"id": 2, "method": "StopProvider"}"#,
        "\n"
    );
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    serve(provider, input.as_bytes(), server).await.unwrap();

    let mut output = String::new();
    client.read_to_string(&mut output).await.unwrap();
    let responses: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(responses.len(), 2);
    let schema = responses
        .iter()
        .find(|response| response["id"] == 1)
        .unwrap();
    assert!(schema["result"]["resources"]["otc_vpc_v1"].is_object());
    assert!(schema["result"]["resources"]["otc_lb_member_v2"].is_object());
}
