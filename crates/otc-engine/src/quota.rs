//! local bounds on concurrent use of finite account quotas.

use crate::error::MultiError;
use otc_core::ErrorKind;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// global acquisition order of quotas.
static NEXT_QUOTA_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuotaError {
    #[error("quota {quota}: timed out after {timeout:?} waiting for {weight}")]
    Timeout {
        quota: String,
        weight: u32,
        timeout: Duration,
    },
    #[error("quota {quota}: weight {weight} exceeds capacity {capacity}")]
    ExceedsCapacity {
        quota: String,
        weight: u32,
        capacity: u32,
    },
    #[error("unknown quota {0}")]
    Unknown(String),
    #[error(transparent)]
    Many(MultiError<QuotaError>),
}

impl QuotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotaError::Timeout { .. } => ErrorKind::QuotaTimeout,
            QuotaError::ExceedsCapacity { .. } => ErrorKind::QuotaExceedsCapacity,
            QuotaError::Unknown(_) => ErrorKind::ValidationFailed,
            QuotaError::Many(errors) => errors
                .errors()
                .first()
                .map(QuotaError::kind)
                .unwrap_or(ErrorKind::Unknown),
        }
    }
}

/// counting semaphore with a name, a capacity and an optional wait budget.
pub struct Quota {
    id: u64,
    name: String,
    capacity: u32,
    timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
}

impl fmt::Debug for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quota")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Quota {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: NEXT_QUOTA_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            capacity,
            timeout: None,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
        }
    }

    /// bound every acquisition by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// capacity from the environment variable `var`, else `default`.
    pub fn from_env(name: impl Into<String>, var: &str, default: u32) -> Self {
        Self::from_lookup(name, var, default, |key| std::env::var(key).ok())
    }

    /// like [`Quota::from_env`] with an explicit lookup; non-integers are ignored.
    pub fn from_lookup(
        name: impl Into<String>,
        var: &str,
        default: u32,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let name = name.into();
        let capacity = match lookup(var) {
            None => default,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(capacity) => capacity,
                Err(_) => {
                    warn!(quota = %name, var, value = %raw, default, "ignoring non-integer quota override");
                    default
                }
            },
        };
        Self::new(name, capacity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// weight currently held.
    pub fn in_use(&self) -> u32 {
        let available = u32::try_from(self.semaphore.available_permits()).unwrap_or(u32::MAX);
        self.capacity.saturating_sub(available)
    }

    /// wait for `weight` units; an untimed quota waits indefinitely.
    pub async fn acquire(&self, weight: u32) -> Result<QuotaPermit, QuotaError> {
        if weight > self.capacity {
            return Err(self.exceeds(weight));
        }
        let acquire = self.semaphore.clone().acquire_many_owned(weight);
        let permit = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    return Err(QuotaError::Timeout {
                        quota: self.name.clone(),
                        weight,
                        timeout,
                    })
                }
            },
            None => acquire.await,
        };
        // the semaphore is never closed
        let permit = permit.map_err(|_| self.exceeds(weight))?;
        debug!(quota = %self.name, weight, in_use = self.in_use(), "quota acquired");
        Ok(QuotaPermit {
            quota: self.name.clone(),
            weight,
            permit: Some(permit),
        })
    }

    fn exceeds(&self, weight: u32) -> QuotaError {
        QuotaError::ExceedsCapacity {
            quota: self.name.clone(),
            weight,
            capacity: self.capacity,
        }
    }
}

/// held weight of one quota; dropping it releases the weight.
#[derive(Debug)]
pub struct QuotaPermit {
    quota: String,
    weight: u32,
    permit: Option<OwnedSemaphorePermit>,
}

impl QuotaPermit {
    pub fn quota(&self) -> &str {
        &self.quota
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// return the weight now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.permit.take().is_some() {
            debug!(quota = %self.quota, weight = self.weight, "quota released");
        }
    }
}

impl Drop for QuotaPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// acquire several quotas as one unit.
///
/// pairs naming the same quota are merged into one weight. quotas are taken
/// in global quota order, so overlapping callers cannot deadlock. either
/// every weight is held afterwards or none is; the first failed quota ends
/// the call and releases what was already taken.
pub async fn acquire_many(pairs: &[(&Quota, u32)]) -> Result<Vec<QuotaPermit>, QuotaError> {
    let mut merged: BTreeMap<u64, (&Quota, u32)> = BTreeMap::new();
    for (quota, weight) in pairs {
        let entry = merged.entry(quota.id).or_insert((*quota, 0));
        entry.1 = entry.1.saturating_add(*weight);
    }

    let oversized: Vec<QuotaError> = merged
        .values()
        .filter(|(quota, weight)| *weight > quota.capacity)
        .map(|(quota, weight)| quota.exceeds(*weight))
        .collect();
    if !oversized.is_empty() {
        return Err(QuotaError::Many(MultiError::new(oversized)));
    }

    let mut permits = Vec::with_capacity(merged.len());
    for (quota, weight) in merged.into_values() {
        match quota.acquire(weight).await {
            Ok(permit) => permits.push(permit),
            Err(err) => {
                drop(permits);
                return Err(QuotaError::Many(MultiError::new(vec![err])));
            }
        }
    }
    Ok(permits)
}

/// quotas known by name, with their environment override and default.
pub const KNOWN_QUOTAS: &[(&str, &str, u32)] = &[
    ("server", "OS_SERVER_QUOTA", 10),
    ("cpu", "OS_CPU_QUOTA", 40),
    ("ram", "OS_RAM_QUOTA", 163_840),
    ("floating_ip", "OS_FLOATING_IP_QUOTA", 5),
    ("router", "OS_ROUTER_QUOTA", 5),
    ("vpc", "OS_VPC_QUOTA", 5),
    ("network", "OS_NETWORK_QUOTA", 20),
    ("subnet", "OS_SUBNET_QUOTA", 20),
    ("security_group", "OS_SECGROUP_QUOTA", 50),
    ("security_group_rule", "OS_SECGROUP_RULE_QUOTA", 500),
    ("loadbalancer", "OS_LB_QUOTA", 5),
    ("lb_listener", "OS_LB_LISTENER_QUOTA", 10),
    ("lb_pool", "OS_LB_POOL_QUOTA", 10),
    ("lb_policy", "OS_LB_POLICY_QUOTA", 10),
    ("lb_certificate", "OS_LB_CERTIFICATE_QUOTA", 10),
    ("cce_cluster", "OS_CCE_CLUSTER_QUOTA", 2),
    ("volume", "OS_VOLUME_QUOTA", 20),
    ("volume_size", "OS_VOLUME_SIZE_QUOTA", 1000),
    ("as_config", "OS_AS_CONFIG_QUOTA", 10),
    ("as_group", "OS_AS_GROUP_QUOTA", 10),
    ("cbr_policy", "OS_CBR_POLICY_QUOTA", 10),
    ("keypair", "OS_KEYPAIR_QUOTA", 10),
];

/// process wide set of named quotas.
#[derive(Debug, Default)]
pub struct QuotaRegistry {
    quotas: BTreeMap<String, Arc<Quota>>,
}

impl QuotaRegistry {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let quotas = KNOWN_QUOTAS
            .iter()
            .map(|(name, var, default)| {
                (
                    name.to_string(),
                    Arc::new(Quota::from_lookup(*name, var, *default, &lookup)),
                )
            })
            .collect();
        Self { quotas }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Quota>, QuotaError> {
        self.quotas
            .get(name)
            .cloned()
            .ok_or_else(|| QuotaError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.quotas.keys().map(String::as_str)
    }

    /// hold `weight` of one named quota until the booking is dropped.
    pub async fn book(&self, name: &str, weight: u32) -> Result<Booking, QuotaError> {
        let quota = self.get(name)?;
        let permit = quota.acquire(weight).await?;
        Ok(Booking {
            permits: vec![permit],
        })
    }

    /// hold several named quotas atomically until the booking is dropped.
    pub async fn book_many(&self, requests: &[(&str, u32)]) -> Result<Booking, QuotaError> {
        let quotas = requests
            .iter()
            .map(|(name, weight)| self.get(name).map(|quota| (quota, *weight)))
            .collect::<Result<Vec<_>, _>>()?;
        let pairs: Vec<(&Quota, u32)> = quotas
            .iter()
            .map(|(quota, weight)| (quota.as_ref(), *weight))
            .collect();
        let permits = acquire_many(&pairs).await?;
        Ok(Booking { permits })
    }
}

/// quotas held on behalf of a test; released on drop.
#[derive(Debug)]
pub struct Booking {
    permits: Vec<QuotaPermit>,
}

impl Booking {
    pub fn permits(&self) -> &[QuotaPermit] {
        &self.permits
    }
}

/// the process wide registry, capacities read from the environment once.
pub fn registry() -> &'static QuotaRegistry {
    static REGISTRY: OnceLock<QuotaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| QuotaRegistry::from_lookup(|var| std::env::var(var).ok()))
}

/// book one named quota from the process registry.
pub async fn book(name: &str, weight: u32) -> Result<Booking, QuotaError> {
    registry().book(name, weight).await
}

/// book several named quotas from the process registry.
pub async fn book_many(requests: &[(&str, u32)]) -> Result<Booking, QuotaError> {
    registry().book_many(requests).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test(start_paused = true)]
    async fn second_acquire_times_out_with_quota_name() {
        let quota = Quota::new("floating_ip", 1).with_timeout(Duration::from_millis(1));
        let held = quota.acquire(1).await.unwrap();
        let err = quota.acquire(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaTimeout);
        assert!(err.to_string().contains("floating_ip"));
        drop(held);
        assert!(quota.acquire(1).await.is_ok());
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let quota = Quota::new("volume", 3);
        let permit = quota.acquire(2).await.unwrap();
        assert_eq!(quota.in_use(), 2);
        permit.release();
        assert_eq!(quota.in_use(), 0);
    }

    #[tokio::test]
    async fn oversized_weights_fail_without_acquiring() {
        let small = Quota::new("small", 1);
        let big = Quota::new("big", 5);
        let err = acquire_many(&[(&small, 2), (&big, 1), (&big, 9)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceedsCapacity);
        match err {
            QuotaError::Many(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(big.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_multi_acquire_rolls_back() {
        let q1 = Quota::new("q1", 1).with_timeout(Duration::from_millis(2));
        let q2 = Quota::new("q2", 2).with_timeout(Duration::from_millis(2));

        let held = q1.acquire(1).await.unwrap();
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(held);
        });

        let err = acquire_many(&[(&q2, 1), (&q1, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaTimeout);
        assert!(err.to_string().contains("q1"));
        assert_eq!(q2.in_use(), 0);
        assert_eq!(q1.in_use(), 1);
        holder.await.unwrap();
        assert_eq!(q1.in_use(), 0);
    }

    #[tokio::test]
    async fn repeated_quota_weights_are_summed() {
        let lb = Quota::new("lb", 1);
        let err = tokio::time::timeout(Duration::from_secs(2), acquire_many(&[(&lb, 1), (&lb, 1)]))
            .await
            .expect("repeated quota blocked on itself")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceedsCapacity);
        assert!(err.to_string().contains("weight 2 exceeds capacity 1"));
        assert_eq!(lb.in_use(), 0);

        let pool = Quota::new("lb_pool", 2);
        let permits = tokio::time::timeout(
            Duration::from_secs(2),
            acquire_many(&[(&pool, 1), (&pool, 1)]),
        )
        .await
        .expect("repeated quota blocked on itself")
        .unwrap();
        assert_eq!(permits.len(), 1);
        assert_eq!(pool.in_use(), 2);
        drop(permits);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_stops_before_later_quotas() {
        let first = Quota::new("router", 1);
        let timed = Quota::new("floating_ip", 1).with_timeout(Duration::from_millis(2));
        let untimed = Quota::new("loadbalancer", 1);
        let held_timed = timed.acquire(1).await.unwrap();
        let held_untimed = untimed.acquire(1).await.unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            acquire_many(&[(&untimed, 1), (&timed, 1), (&first, 1)]),
        )
        .await
        .expect("kept waiting after a quota timed out")
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaTimeout);
        assert!(err.to_string().contains("floating_ip"));
        assert_eq!(first.in_use(), 0);
        assert_eq!(untimed.in_use(), 1);
        drop((held_timed, held_untimed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn opposite_orders_do_not_deadlock() {
        let a = Arc::new(Quota::new("a", 1));
        let b = Arc::new(Quota::new("b", 1));
        let mut tasks = Vec::new();
        for round in 0..50 {
            let (a, b) = (a.clone(), b.clone());
            tasks.push(tokio::spawn(async move {
                let permits = if round % 2 == 0 {
                    acquire_many(&[(&*a, 1), (&*b, 1)]).await
                } else {
                    acquire_many(&[(&*b, 1), (&*a, 1)]).await
                }
                .unwrap();
                tokio::task::yield_now().await;
                drop(permits);
            }));
        }
        let all = futures::future::join_all(tasks);
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("multi acquire deadlocked")
            .into_iter()
            .for_each(|result| result.unwrap());
        assert_eq!(a.in_use() + b.in_use(), 0);
    }

    #[test]
    fn registry_reads_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> =
            HashMap::from([("OS_LB_QUOTA", "7"), ("OS_VOLUME_QUOTA", "lots")]);
        let registry = QuotaRegistry::from_lookup(|var| env.get(var).map(|v| v.to_string()));
        assert_eq!(registry.get("loadbalancer").unwrap().capacity(), 7);
        assert_eq!(registry.get("volume").unwrap().capacity(), 20);
        assert!(matches!(
            registry.get("unicorns"),
            Err(QuotaError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn booking_releases_on_drop() {
        let registry = QuotaRegistry::from_lookup(|_| None);
        let booking = registry
            .book_many(&[("volume", 2), ("volume_size", 100)])
            .await
            .unwrap();
        assert_eq!(booking.permits().len(), 2);
        assert_eq!(registry.get("volume_size").unwrap().in_use(), 100);
        drop(booking);
        assert_eq!(registry.get("volume_size").unwrap().in_use(), 0);
    }
}
