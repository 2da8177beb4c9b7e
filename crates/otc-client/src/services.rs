//! the table of cloud services and how their endpoints are resolved.

use crate::catalog::Catalog;
use crate::error::ClientError;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// scope a service's token must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScope {
    Project,
    Domain,
}

/// static description of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSpec {
    /// catalog type, also the key for endpoint overrides.
    pub catalog_type: &'static str,
    /// host prefix of the public endpoint.
    pub host: &'static str,
    /// versioned path appended to the resolved root.
    pub path: &'static str,
    pub scope: ServiceScope,
    /// `(from, to)` substitutions applied to the final url.
    pub rewrites: &'static [(&'static str, &'static str)],
}

macro_rules! services {
    ($($variant:ident => $name:literal, $catalog:literal, $host:literal, $path:literal, $scope:ident $(, $from:literal => $to:literal)?;)*) => {
        /// every service the provider can build a client for.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ServiceType {
            $($variant,)*
        }

        impl ServiceType {
            pub const ALL: &'static [ServiceType] = &[$(ServiceType::$variant,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ServiceType::$variant => $name,)*
                }
            }

            pub fn spec(&self) -> ServiceSpec {
                match self {
                    $(ServiceType::$variant => ServiceSpec {
                        catalog_type: $catalog,
                        host: $host,
                        path: $path,
                        scope: ServiceScope::$scope,
                        rewrites: &[$(($from, $to))?],
                    },)*
                }
            }
        }
    };
}

services! {
    IdentityV3 => "identity_v3", "identity", "iam", "/v3/", Domain;
    IdentityV30 => "identity_v3.0", "identity", "iam", "/v3/", Domain, "/v3/" => "/v3.0/";
    ComputeV2 => "compute_v2", "compute", "ecs", "/v2.1/{project_id}/", Project;
    ComputeV1 => "compute_v1", "ecs", "ecs", "/v1/{project_id}/", Project;
    NetworkV1 => "network_v1", "vpc", "vpc", "/v1/{project_id}/", Project;
    NetworkV2 => "network_v2", "network", "vpc", "/v2.0/", Project;
    BlockStorageV2 => "blockstorage_v2", "volumev2", "evs", "/v2/{project_id}/", Project;
    BlockStorageV3 => "blockstorage_v3", "volumev3", "evs", "/v3/{project_id}/", Project;
    ElbV1 => "elb_v1", "elb", "elb", "/v1.0/{project_id}/", Project;
    ElbV2 => "elb_v2", "elbv2", "elb", "/v2.0/", Project;
    ElbV3 => "elb_v3", "elbv3", "elb", "/v3/{project_id}/", Project;
    CceV3 => "cce_v3", "ccev2.0", "cce", "/api/v3/projects/{project_id}/", Project;
    CbrV3 => "cbr_v3", "cbr", "cbr", "/v3/{project_id}/", Project;
    SfsV2 => "sfs_v2", "sharev2", "sfs", "/v2/{project_id}/", Project;
    SfsTurboV1 => "sfs_turbo_v1", "sfsturbo", "sfs-turbo", "/v1/{project_id}/", Project;
    AutoscalingV1 => "autoscaling_v1", "asv1", "as", "/autoscaling-api/v1/{project_id}/", Project;
    AutoscalingV2 => "autoscaling_v2", "asv2", "as", "/autoscaling-api/v2/{project_id}/", Project;
    VpcEpV1 => "vpcep_v1", "vpcep", "vpcep", "/v1/{project_id}/", Project;
    SmnV2 => "smn_v2", "smn", "smn", "/v2/{project_id}/", Project;
    DnsV2 => "dns_v2", "dns", "dns", "/v2/", Project;
    ImageV2 => "image_v2", "image", "ims", "/v2/", Project;
    KmsV1 => "kms_v1", "kms", "kms", "/v1.0/{project_id}/", Project;
    RdsV3 => "rds_v3", "rdsv3", "rds", "/v3/{project_id}/", Project;
    DcsV1 => "dcs_v1", "dcsv1", "dcs", "/v1.0/{project_id}/", Project;
    DmsV1 => "dms_v1", "dms", "dms", "/v1.0/{project_id}/", Project;
    NatV2 => "nat_v2", "nat", "nat", "/v2.0/", Project;
    CtsV1 => "cts_v1", "cts", "cts", "/v1.0/{project_id}/", Project;
    CesV1 => "ces_v1", "cesv1", "ces", "/V1.0/{project_id}/", Project;
    DdsV3 => "dds_v3", "ddsv3", "dds", "/v3/{project_id}/", Project;
    WafV1 => "waf_v1", "waf", "waf", "/v1/{project_id}/", Project;
    SwrV2 => "swr_v2", "swr", "swr", "/v2/", Project;
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServiceType {
    pub fn is_identity(&self) -> bool {
        self.spec().catalog_type == "identity"
    }
}

/// everything endpoint resolution looks at.
#[derive(Debug, Clone, Copy)]
pub struct EndpointContext<'a> {
    pub overrides: &'a BTreeMap<String, String>,
    pub catalog: &'a Catalog,
    pub region: &'a str,
    pub cloud: &'a str,
    pub project_id: Option<&'a str>,
    /// configured auth url; the root of identity services.
    pub identity_endpoint: &'a str,
}

/// resolve the base url of `service`: override, then catalog, then template.
///
/// the returned url always ends with `/` so relative paths join below it.
pub fn resolve_endpoint(service: ServiceType, ctx: &EndpointContext<'_>) -> Result<Url, ClientError> {
    let spec = service.spec();
    let root = match ctx.overrides.get(spec.catalog_type) {
        Some(template) => fill(service, template, ctx)?,
        None if service.is_identity() => origin(service, ctx.identity_endpoint)?,
        None => match ctx.catalog.endpoint(spec.catalog_type, ctx.region) {
            Some(url) => origin(service, url)?,
            None => format!("https://{}.{}.{}", spec.host, ctx.region, ctx.cloud),
        },
    };
    let mut url = format!("{}{}", root.trim_end_matches('/'), fill(service, spec.path, ctx)?);
    for (from, to) in spec.rewrites {
        url = url.replace(from, to);
    }
    if !url.ends_with('/') {
        url.push('/');
    }
    Url::parse(&url).map_err(|err| ClientError::init(service, format!("invalid endpoint {url}: {err}")))
}

fn fill(service: ServiceType, template: &str, ctx: &EndpointContext<'_>) -> Result<String, ClientError> {
    let filled = template.replace("{region}", ctx.region);
    if !filled.contains("{project_id}") {
        return Ok(filled);
    }
    let project_id = ctx
        .project_id
        .ok_or_else(|| ClientError::init(service, "project id is not known for a project scoped service"))?;
    Ok(filled.replace("{project_id}", project_id))
}

fn origin(service: ServiceType, raw: &str) -> Result<String, ClientError> {
    let url = Url::parse(raw)
        .map_err(|err| ClientError::init(service, format!("invalid endpoint {raw}: {err}")))?;
    Ok(url.origin().ascii_serialization())
}
