use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use glob::{MatchOptions, Pattern};
use ipnet::IpNet;
use regex::Regex;

use crate::errors::AuthzError;
use crate::matcher::value::Value;
use crate::rbac::RoleManager;

/// A function callable from a matcher expression.
pub type MatcherFn = Arc<dyn Fn(&[Value]) -> Result<Value, AuthzError> + Send + Sync>;

static COLON_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":[^/]+").expect("valid regex"));
static BRACE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^/]+?\}").expect("valid regex"));

/// Name -> function table consulted by the evaluator.
#[derive(Clone)]
pub struct FunctionMap {
    fns: HashMap<String, MatcherFn>,
}

impl Default for FunctionMap {
    /// The builtin string and network helpers.
    fn default() -> Self {
        let mut map = FunctionMap::empty();
        map.add("keyMatch", string_predicate("keyMatch", |a, b| Ok(key_match(a, b))));
        map.add("keyMatch2", string_predicate("keyMatch2", key_match2));
        map.add("keyMatch3", string_predicate("keyMatch3", key_match3));
        map.add("keyMatch4", string_predicate("keyMatch4", key_match4));
        map.add("keyMatch5", string_predicate("keyMatch5", key_match5));
        map.add("regexMatch", string_predicate("regexMatch", regex_match));
        map.add("ipMatch", string_predicate("ipMatch", ip_match));
        map.add("globMatch", string_predicate("globMatch", glob_match));
        map.add(
            "keyGet",
            Arc::new(|args: &[Value]| {
                let [a, b] = string_args::<2>("keyGet", args)?;
                Ok(Value::Str(key_get(a, b)))
            }),
        );
        map.add(
            "keyGet2",
            Arc::new(|args: &[Value]| {
                let [a, b, name] = string_args::<3>("keyGet2", args)?;
                Ok(Value::Str(key_get2(a, b, name)?))
            }),
        );
        map.add(
            "keyGet3",
            Arc::new(|args: &[Value]| {
                let [a, b, name] = string_args::<3>("keyGet3", args)?;
                Ok(Value::Str(key_get3(a, b, name)?))
            }),
        );
        map
    }
}

impl FunctionMap {
    pub fn empty() -> Self {
        Self {
            fns: HashMap::new(),
        }
    }

    pub fn add(&mut self, name: &str, function: MatcherFn) {
        self.fns.insert(name.to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<&MatcherFn> {
        self.fns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}

impl std::fmt::Debug for FunctionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.fns.keys().collect();
        names.sort();
        f.debug_struct("FunctionMap").field("names", &names).finish()
    }
}

fn string_args<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
) -> Result<[&'a str; N], AuthzError> {
    if args.len() != N {
        return Err(AuthzError::Evaluation(format!(
            "{name}: expected {N} arguments, but got {}",
            args.len()
        )));
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str().ok_or_else(|| {
            AuthzError::Evaluation(format!(
                "{name}: argument must be a string, got {}",
                arg.type_name()
            ))
        })?;
    }
    Ok(out)
}

fn string_predicate(
    name: &'static str,
    f: fn(&str, &str) -> Result<bool, AuthzError>,
) -> MatcherFn {
    Arc::new(move |args: &[Value]| {
        let [a, b] = string_args::<2>(name, args)?;
        Ok(Value::Bool(f(a, b)?))
    })
}

/// Build the `g`-style function for one role manager. Results are memoised for
/// the lifetime of the returned function, which the enforcer scopes to a
/// single enforcement call.
pub fn role_function(rm: Option<Arc<dyn RoleManager>>) -> MatcherFn {
    let memo: DashMap<String, bool> = DashMap::new();
    Arc::new(move |args: &[Value]| {
        if args.len() < 2 {
            return Err(AuthzError::Evaluation(format!(
                "role function expects at least 2 arguments, got {}",
                args.len()
            )));
        }
        let names = args
            .iter()
            .map(|a| {
                a.as_str().ok_or_else(|| {
                    AuthzError::Evaluation(format!(
                        "role function arguments must be strings, got {}",
                        a.type_name()
                    ))
                })
            })
            .collect::<Result<Vec<&str>, _>>()?;

        let key = names.join("\0");
        if let Some(hit) = memo.get(&key) {
            return Ok(Value::Bool(*hit));
        }

        let linked = match &rm {
            None => names[0] == names[1],
            Some(rm) => rm.has_link(names[0], names[1], &names[2..])?,
        };
        memo.insert(key, linked);
        Ok(Value::Bool(linked))
    })
}

/// `/foo/bar` matches `/foo/*`.
pub fn key_match(key1: &str, key2: &str) -> bool {
    let Some(i) = key2.find('*') else {
        return key1 == key2;
    };
    if key1.len() > i {
        key1.as_bytes()[..i] == key2.as_bytes()[..i]
    } else {
        key1 == &key2[..i]
    }
}

/// The part of `key1` matched by the `*` in `key2`, or empty.
pub fn key_get(key1: &str, key2: &str) -> String {
    let Some(i) = key2.find('*') else {
        return String::new();
    };
    if key1.len() > i && key1.as_bytes()[..i] == key2.as_bytes()[..i] {
        return String::from_utf8_lossy(&key1.as_bytes()[i..]).into_owned();
    }
    String::new()
}

/// `/resource1` matches `/:resource`.
pub fn key_match2(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    let pattern = key2.replace("/*", "/.*");
    let pattern = COLON_PARAM.replace_all(&pattern, "[^/]+");
    regex_match(key1, &format!("^{pattern}$"))
}

pub fn key_get2(key1: &str, key2: &str, path_var: &str) -> Result<String, AuthzError> {
    let pattern = key2.replace("/*", "/.*");
    let keys: Vec<String> = COLON_PARAM
        .find_iter(&pattern)
        .map(|m| m.as_str()[1..].to_string())
        .collect();
    let pattern = COLON_PARAM.replace_all(&pattern, "([^/]+)");
    extract_path_var(key1, &pattern, &keys, path_var)
}

/// `/resource1` matches `/{resource}`.
pub fn key_match3(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    let pattern = key2.replace("/*", "/.*");
    let pattern = BRACE_PARAM.replace_all(&pattern, "[^/]+");
    regex_match(key1, &format!("^{pattern}$"))
}

pub fn key_get3(key1: &str, key2: &str, path_var: &str) -> Result<String, AuthzError> {
    let pattern = key2.replace("/*", "/.*");
    let keys: Vec<String> = BRACE_PARAM
        .find_iter(&pattern)
        .map(|m| {
            let s = m.as_str();
            s[1..s.len() - 1].to_string()
        })
        .collect();
    let pattern = BRACE_PARAM.replace_all(&pattern, "([^/]+?)");
    extract_path_var(key1, &pattern, &keys, path_var)
}

fn extract_path_var(
    key1: &str,
    pattern: &str,
    keys: &[String],
    path_var: &str,
) -> Result<String, AuthzError> {
    let re = compile(&format!("^{pattern}$"))?;
    let Some(caps) = re.captures(key1) else {
        return Ok(String::new());
    };
    Ok(keys
        .iter()
        .position(|k| k == path_var)
        .and_then(|i| caps.get(i + 1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default())
}

/// Like `keyMatch3`, but a repeated `{name}` must bind the same value each time.
pub fn key_match4(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    let pattern = key2.replace("/*", "/.*");
    let mut tokens = Vec::new();
    let pattern = BRACE_PARAM.replace_all(&pattern, |caps: &regex::Captures<'_>| {
        let s = &caps[0];
        tokens.push(s[1..s.len() - 1].to_string());
        "([^/]+)".to_string()
    });
    let re = compile(&format!("^{pattern}$"))?;
    let Some(caps) = re.captures(key1) else {
        return Ok(false);
    };

    let mut values: HashMap<&str, &str> = HashMap::new();
    for (i, token) in tokens.iter().enumerate() {
        let Some(m) = caps.get(i + 1) else {
            return Ok(false);
        };
        let bound = values.entry(token.as_str()).or_insert(m.as_str());
        if *bound != m.as_str() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Like `keyMatch3`, ignoring a query string on `key1`.
pub fn key_match5(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    let key1 = key1.split_once('?').map_or(key1, |(path, _)| path);
    key_match3(key1, key2)
}

pub fn regex_match(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    Ok(compile(key2)?.is_match(key1))
}

/// `ip1` equals `ip2`, or lies inside it when `ip2` is a CIDR block.
pub fn ip_match(ip1: &str, ip2: &str) -> Result<bool, AuthzError> {
    let addr: IpAddr = ip1.parse().map_err(|_| {
        AuthzError::Evaluation(format!(
            "invalid argument: ip1 `{ip1}` in ipMatch() is not an IP address"
        ))
    })?;
    if let Ok(net) = ip2.parse::<IpNet>() {
        return Ok(net.contains(&addr));
    }
    let other: IpAddr = ip2.parse().map_err(|_| {
        AuthzError::Evaluation(format!(
            "invalid argument: ip2 `{ip2}` in ipMatch() is neither an IP address nor a CIDR"
        ))
    })?;
    Ok(addr == other)
}

/// Shell-style glob where `*` does not cross `/`.
pub fn glob_match(key1: &str, key2: &str) -> Result<bool, AuthzError> {
    let pattern = Pattern::new(key2)
        .map_err(|e| AuthzError::Evaluation(format!("globMatch: invalid pattern `{key2}`: {e}")))?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    Ok(pattern.matches_with(key1, options))
}

fn compile(pattern: &str) -> Result<Regex, AuthzError> {
    Regex::new(pattern)
        .map_err(|e| AuthzError::Evaluation(format!("invalid regular expression `{pattern}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_match() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo", "/foo*"));
        assert!(!key_match("/bar/foo", "/foo/*"));
        assert!(key_match("/foo", "/foo"));
    }

    #[test]
    fn test_key_get() {
        assert_eq!(key_get("/foo/bar", "/foo/*"), "bar");
        assert_eq!(key_get("/foo", "/foo"), "");
    }

    #[test]
    fn test_key_match2() {
        assert!(key_match2("/resource1", "/:resource").unwrap());
        assert!(key_match2("/alice_data/1", "/alice_data/*").unwrap());
        assert!(!key_match2("/foo/bar/baz", "/foo/:id").unwrap());
    }

    #[test]
    fn test_key_get2() {
        assert_eq!(key_get2("/resource1/action", "/:res/action", "res").unwrap(), "resource1");
        assert_eq!(key_get2("/resource1/action", "/:res/action", "other").unwrap(), "");
    }

    #[test]
    fn test_key_match3_and_get3() {
        assert!(key_match3("/proxy/myid/res", "/proxy/{id}/*").unwrap());
        assert!(!key_match3("/proxy/myid", "/proxy/{id}/res").unwrap());
        assert_eq!(key_get3("/api/v1/users/42", "/api/v1/users/{id}", "id").unwrap(), "42");
    }

    #[test]
    fn test_key_match4_repeated_params() {
        assert!(key_match4("/parent/123/child/123", "/parent/{id}/child/{id}").unwrap());
        assert!(!key_match4("/parent/123/child/456", "/parent/{id}/child/{id}").unwrap());
    }

    #[test]
    fn test_key_match5_ignores_query() {
        assert!(key_match5("/foo/bar?status=1", "/foo/{id}").unwrap());
        assert!(!key_match5("/foo/bar/baz?x=1", "/foo/{id}").unwrap());
    }

    #[test]
    fn test_ip_match() {
        assert!(ip_match("192.168.2.123", "192.168.2.0/24").unwrap());
        assert!(!ip_match("192.168.3.1", "192.168.2.0/24").unwrap());
        assert!(ip_match("10.0.0.1", "10.0.0.1").unwrap());
        assert!(ip_match("not-an-ip", "10.0.0.1").is_err());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/foo/bar", "/foo/*").unwrap());
        assert!(!glob_match("/foo/bar/baz", "/foo/*").unwrap());
    }

    #[test]
    fn test_regex_match_error_propagates() {
        assert!(regex_match("abc", "^a").unwrap());
        assert!(matches!(regex_match("abc", "("), Err(AuthzError::Evaluation(_))));
    }

    #[test]
    fn test_builtin_rejects_non_string() {
        let functions = FunctionMap::default();
        let key_match = functions.get("keyMatch").unwrap();
        let err = key_match(&[Value::Int(1), Value::from("/foo")]).unwrap_err();
        assert!(matches!(err, AuthzError::Evaluation(_)));
    }

    #[test]
    fn test_role_function_without_manager_is_equality() {
        let g = role_function(None);
        let same = [Value::from("a"), Value::from("a")];
        let different = [Value::from("a"), Value::from("b")];
        assert_eq!(g(&same).unwrap(), Value::Bool(true));
        assert_eq!(g(&different).unwrap(), Value::Bool(false));
    }
}
