/// Resolve the agent identity from the environment.
///
/// Checks `HUDDLE_AGENT`. Returns `None` if unset or empty.
pub fn resolve_agent() -> Option<String> {
    std::env::var("HUDDLE_AGENT").ok().filter(|s| !s.trim().is_empty())
}

/// Auto-generated fallback identity, `agent-<8 hex>`.
pub fn generated_fallback() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("agent-{}", &token[..8])
}

/// Identity for a command: explicit `--as`, then `HUDDLE_AGENT`, then a
/// generated fallback.
pub fn current_agent(explicit: Option<&str>) -> String {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(resolve_agent)
        .unwrap_or_else(generated_fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests must not run concurrently.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn generated_fallback_shape() {
        let f = generated_fallback();
        assert!(f.starts_with("agent-"));
        assert_eq!(f.len(), "agent-".len() + 8);
    }

    #[test]
    fn resolve_agent_env_behavior() {
        let _guard = ENV_LOCK.lock().unwrap();

        unsafe { std::env::set_var("HUDDLE_AGENT", "planner") };
        assert_eq!(resolve_agent(), Some("planner".to_string()));
        assert_eq!(current_agent(None), "planner");
        assert_eq!(current_agent(Some("reviewer")), "reviewer");

        unsafe { std::env::set_var("HUDDLE_AGENT", "") };
        assert_eq!(resolve_agent(), None);

        unsafe { std::env::remove_var("HUDDLE_AGENT") };
        assert_eq!(resolve_agent(), None);
        assert!(current_agent(Some("  ")).starts_with("agent-"));
    }
}
