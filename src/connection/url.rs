//! Parsing and building of multi-host PostgreSQL connection strings
//!
//! A cluster connection string has the form
//! `<scheme>://host1:port1[,host2:port2,...]/<dbname>[?key=value&...]`.
//! Hosts are split into one single-host URL each so that every cluster member
//! can be reached individually, and single-host URLs can be merged back into one
//! URL that lets the driver pick the primary.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{HealthError, HealthResult};

/// Recognized connection string prefixes
pub const URL_SCHEMES: [&str; 4] = [
    "jdbc:postgresql://",
    "postgresql://",
    "postgres://",
    "pg://",
];

/// Name of the routing parameter
pub const TARGET_SERVER_TYPE: &str = "targetServerType";

const REPLICA_SERVER_TYPES: [&str; 2] = ["secondary", "slave"];
const PRIMARY_SERVER_TYPES: [&str; 2] = ["primary", "master"];
const ANY_SERVER_TYPE: &str = "any";

/// Parameters applied to a merged URL when the caller does not set them
pub const DEFAULT_URL_PARAMETERS: [(&str, &str); 4] = [
    (TARGET_SERVER_TYPE, "primary"),
    ("hostRecheckSeconds", "2"),
    ("connectTimeout", "1"),
    ("socketTimeout", "600"),
];

/// Return the scheme prefix of `url`, failing when it is not a known one
pub fn scheme_of(url: &str) -> HealthResult<&'static str> {
    if url.trim().is_empty() {
        return Err(HealthError::malformed("connection string cannot be blank"));
    }
    URL_SCHEMES
        .iter()
        .copied()
        .find(|scheme| url.starts_with(scheme))
        .ok_or_else(|| HealthError::malformed(format!("unsupported scheme in '{}'", url)))
}

/// Split a URL into `(scheme, hosts section, "/dbname?params" section)`
fn split_url(url: &str) -> HealthResult<(&'static str, &str, &str)> {
    let scheme = scheme_of(url)?;
    let rest = &url[scheme.len()..];
    let slash = rest
        .rfind('/')
        .ok_or_else(|| HealthError::malformed(format!("missing database name in '{}'", url)))?;
    let (hosts, db_with_params) = rest.split_at(slash);
    if hosts.split(',').all(|h| h.trim().is_empty()) {
        return Err(HealthError::malformed(format!("no hosts found in '{}'", url)));
    }
    Ok((scheme, hosts, db_with_params))
}

/// Parse a single `host:port` item
fn parse_host_and_port(item: &str) -> HealthResult<(String, u16)> {
    let (name, port) = item
        .rsplit_once(':')
        .ok_or_else(|| HealthError::malformed(format!("host '{}' has no port", item)))?;
    if name.trim().is_empty() {
        return Err(HealthError::malformed(format!("host '{}' has no name", item)));
    }
    let port: u32 = port
        .parse()
        .map_err(|_| HealthError::malformed(format!("host '{}' has an invalid port", item)))?;
    let port = validate_port(port)?;
    Ok((name.to_string(), port))
}

/// Ports below 1024 are reserved for system services
pub fn validate_port(port: u32) -> HealthResult<u16> {
    if !(1024..=65_535).contains(&port) {
        return Err(HealthError::invalid_host(format!(
            "port {} must be in the range from 1024 to 65535",
            port
        )));
    }
    Ok(port as u16)
}

/// Iterate the non-blank `host:port` items of a hosts section
fn host_items(hosts: &str) -> impl Iterator<Item = &str> {
    hosts.split(',').map(str::trim).filter(|h| !h.is_empty())
}

/// Parse the query part of a URL into key/value pairs, keeping their order
pub fn query_parameters(url: &str) -> Vec<(&str, &str)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect()
}

fn target_server_type(url: &str) -> Option<&str> {
    query_parameters(url)
        .into_iter()
        .find(|(key, _)| *key == TARGET_SERVER_TYPE)
        .map(|(_, value)| value)
}

/// Whether the URL routes to read replicas only
///
/// Pure string inspection: `targetServerType` must be exactly `secondary` or
/// `slave`. No connection is made.
pub fn is_replica_url(url: &str) -> bool {
    target_server_type(url).is_some_and(|value| REPLICA_SERVER_TYPES.contains(&value))
}

/// Extract the sorted, de-duplicated `(host, port)` pairs of a URL
pub fn extract_host_names(url: &str) -> HealthResult<Vec<(String, u16)>> {
    let (_, hosts, _) = split_url(url)?;
    let unique = host_items(hosts)
        .map(parse_host_and_port)
        .collect::<HealthResult<BTreeSet<_>>>()?;
    Ok(unique.into_iter().collect())
}

/// Rewrite a primary-only routing parameter so a single host accepts any role
fn to_any_server_type(db_with_params: &str) -> String {
    let Some((db, query)) = db_with_params.split_once('?') else {
        return db_with_params.to_string();
    };
    let params = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((TARGET_SERVER_TYPE, value)) if PRIMARY_SERVER_TYPES.contains(&value) => {
                format!("{}={}", TARGET_SERVER_TYPE, ANY_SERVER_TYPE)
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", db, params)
}

/// Build one single-host URL per distinct host of `url`
///
/// Returns `("host:port", single host url)` pairs sorted by the `host:port` key.
/// The database name and parameters are kept; a primary-only
/// `targetServerType` becomes `any` so each member is reachable whatever its role.
pub fn extract_url_for_each_host(url: &str) -> HealthResult<Vec<(String, String)>> {
    let (scheme, hosts, db_with_params) = split_url(url)?;
    let db_with_params = to_any_server_type(db_with_params);
    let mut unique = BTreeSet::new();
    for item in host_items(hosts) {
        parse_host_and_port(item)?;
        unique.insert(item.to_string());
    }
    Ok(unique
        .into_iter()
        .map(|host| {
            let single = format!("{}{}{}", scheme, host, db_with_params);
            (host, single)
        })
        .collect())
}

/// Extract `/dbname` (including the leading slash) from a URL
pub fn extract_database_name(url: &str) -> HealthResult<&str> {
    let (_, _, db_with_params) = split_url(url)?;
    let db = match db_with_params.find('?') {
        Some(1) => {
            return Err(HealthError::malformed(format!(
                "missing database name in '{}'",
                url
            )))
        }
        Some(index) => &db_with_params[..index],
        None => db_with_params,
    };
    if db.len() <= 1 {
        return Err(HealthError::malformed(format!(
            "missing database name in '{}'",
            url
        )));
    }
    Ok(db)
}

/// Join the default parameters with caller-supplied ones (caller wins)
pub fn construct_url_parameters(parameters: &BTreeMap<String, String>) -> String {
    let mut joint = parameters.clone();
    for (key, value) in DEFAULT_URL_PARAMETERS {
        joint
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    let query = joint
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", query)
}

/// Merge URLs sharing one database into a single multi-host URL
///
/// Hosts are lexically sorted and de-duplicated; the scheme comes from the
/// lexically first URL. Query parameters are the defaults overridden by
/// `parameters`; parameters of the input URLs are not carried over.
pub fn build_common_url<I, S>(urls: I, parameters: &BTreeMap<String, String>) -> HealthResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let urls: BTreeSet<String> = urls.into_iter().map(|u| u.as_ref().to_string()).collect();
    let first = urls
        .iter()
        .next()
        .ok_or_else(|| HealthError::malformed("at least one connection string is required"))?;
    let scheme = scheme_of(first)?;
    let database = extract_database_name(first)?;

    let mut hosts = BTreeSet::new();
    for url in &urls {
        let other = extract_database_name(url)?;
        if other != database {
            return Err(HealthError::malformed(format!(
                "connection strings point to different databases: '{}' and '{}'",
                database, other
            )));
        }
        let (_, section, _) = split_url(url)?;
        for item in host_items(section) {
            parse_host_and_port(item)?;
            hosts.insert(item.to_string());
        }
    }

    Ok(format!(
        "{}{}{}{}",
        scheme,
        hosts.into_iter().collect::<Vec<_>>().join(","),
        database,
        construct_url_parameters(parameters)
    ))
}

/// Merge URLs into a primary-targeting URL using only the default parameters
pub fn build_common_url_to_primary<I, S>(urls: I) -> HealthResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    build_common_url(urls, &BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER_URL: &str =
        "jdbc:postgresql://host-2:6432,host-1:6432,host-3:6432/db_name?ssl=true&targetServerType=primary";

    #[test]
    fn test_scheme_detection() {
        assert_eq!(scheme_of("pg://h1:5432/db").unwrap(), "pg://");
        assert_eq!(
            scheme_of("jdbc:postgresql://h1:5432/db").unwrap(),
            "jdbc:postgresql://"
        );
        assert!(matches!(
            scheme_of("mysql://h1:3306/db"),
            Err(HealthError::MalformedConnectionString { .. })
        ));
        assert!(matches!(
            scheme_of("   "),
            Err(HealthError::MalformedConnectionString { .. })
        ));
    }

    #[test]
    fn test_extract_host_names_sorted_and_unique() {
        let hosts = extract_host_names(
            "pg://h2:5432,h1:5432,h2:5432/db?targetServerType=primary",
        )
        .unwrap();
        assert_eq!(
            hosts,
            vec![("h1".to_string(), 5432), ("h2".to_string(), 5432)]
        );
    }

    #[test]
    fn test_extract_host_names_errors() {
        assert!(matches!(
            extract_host_names("pg:///db"),
            Err(HealthError::MalformedConnectionString { .. })
        ));
        assert!(matches!(
            extract_host_names("pg://h1/db"),
            Err(HealthError::MalformedConnectionString { .. })
        ));
        assert!(matches!(
            extract_host_names("pg://h1:abc/db"),
            Err(HealthError::MalformedConnectionString { .. })
        ));
        assert!(matches!(
            extract_host_names("pg://h1:5432"),
            Err(HealthError::MalformedConnectionString { .. })
        ));
        assert!(matches!(
            extract_host_names("pg://h1:80/db"),
            Err(HealthError::InvalidHostConfiguration { .. })
        ));
        assert!(matches!(
            extract_host_names("pg://h1:70000/db"),
            Err(HealthError::InvalidHostConfiguration { .. })
        ));
    }

    #[test]
    fn test_is_replica_url() {
        assert!(is_replica_url("pg://h1:5432/db?targetServerType=secondary"));
        assert!(is_replica_url(
            "pg://h1:5432,h2:5432/db?ssl=true&targetServerType=slave"
        ));
        assert!(!is_replica_url("pg://h1:5432/db?targetServerType=primary"));
        assert!(!is_replica_url("pg://h1:5432/db?targetServerType=any"));
        assert!(!is_replica_url("pg://h1:5432/db?targetServerType=Secondary"));
        assert!(!is_replica_url(
            "pg://h1:5432/db?targetServerType=secondaryPreferred"
        ));
        assert!(!is_replica_url("pg://h1:5432/db"));
    }

    #[test]
    fn test_extract_url_for_each_host() {
        let hosts = extract_url_for_each_host(CLUSTER_URL).unwrap();
        assert_eq!(
            hosts,
            vec![
                (
                    "host-1:6432".to_string(),
                    "jdbc:postgresql://host-1:6432/db_name?ssl=true&targetServerType=any".to_string()
                ),
                (
                    "host-2:6432".to_string(),
                    "jdbc:postgresql://host-2:6432/db_name?ssl=true&targetServerType=any".to_string()
                ),
                (
                    "host-3:6432".to_string(),
                    "jdbc:postgresql://host-3:6432/db_name?ssl=true&targetServerType=any".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_replica_urls_keep_routing_parameter() {
        let hosts =
            extract_url_for_each_host("pg://h1:5432,h2:5432/db?targetServerType=secondary").unwrap();
        assert!(hosts.iter().all(|(_, url)| is_replica_url(url)));
        assert_eq!(hosts[0].1, "pg://h1:5432/db?targetServerType=secondary");
    }

    #[test]
    fn test_extract_database_name() {
        assert_eq!(extract_database_name(CLUSTER_URL).unwrap(), "/db_name");
        assert_eq!(extract_database_name("pg://h1:5432/db").unwrap(), "/db");
        assert!(extract_database_name("pg://h1:5432/?ssl=true").is_err());
        assert!(extract_database_name("pg://h1:5432/").is_err());
    }

    #[test]
    fn test_construct_url_parameters() {
        assert_eq!(
            construct_url_parameters(&BTreeMap::new()),
            "?connectTimeout=1&hostRecheckSeconds=2&socketTimeout=600&targetServerType=primary"
        );

        let mut custom = BTreeMap::new();
        custom.insert("connectTimeout".to_string(), "5".to_string());
        custom.insert("ssl".to_string(), "true".to_string());
        assert_eq!(
            construct_url_parameters(&custom),
            "?connectTimeout=5&hostRecheckSeconds=2&socketTimeout=600&ssl=true&targetServerType=primary"
        );
    }

    #[test]
    fn test_build_common_url() {
        let url = build_common_url_to_primary([
            "jdbc:postgresql://host-2:6432/db_name?targetServerType=any",
            "jdbc:postgresql://host-1:6432/db_name?targetServerType=any",
            "jdbc:postgresql://host-1:6432/db_name?ssl=true",
        ])
        .unwrap();
        assert_eq!(
            url,
            "jdbc:postgresql://host-1:6432,host-2:6432/db_name?connectTimeout=1&hostRecheckSeconds=2&socketTimeout=600&targetServerType=primary"
        );
    }

    #[test]
    fn test_build_common_url_rejects_mixed_databases() {
        let result = build_common_url_to_primary(["pg://h1:5432/one", "pg://h2:5432/two"]);
        assert!(matches!(
            result,
            Err(HealthError::MalformedConnectionString { .. })
        ));
        let empty: [&str; 0] = [];
        assert!(build_common_url_to_primary(empty).is_err());
    }

    #[test]
    fn test_host_round_trip() {
        let url = "pg://h3:5433,h1:5432,h2:5432,h1:5432/db?targetServerType=primary";
        let single_urls: Vec<String> = extract_url_for_each_host(url)
            .unwrap()
            .into_iter()
            .map(|(_, single)| single)
            .collect();
        let merged = build_common_url_to_primary(&single_urls).unwrap();
        assert_eq!(
            extract_host_names(&merged).unwrap(),
            extract_host_names(url).unwrap()
        );
    }
}
