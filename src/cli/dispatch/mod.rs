use anyhow::Result;
use secrecy::SecretString;

use crate::auth::config::AuthConfig;
use crate::cli::actions::Action;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .map(|s| SecretString::from(s.clone()))
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --jwt-secret"))?;

    let get = |name: &str| {
        matches
            .get_one::<String>(name)
            .map(String::to_string)
            .unwrap_or_default()
    };

    let config = AuthConfig::new(jwt_secret)
        .with_access_token_ttl(get("access-token-ttl"))
        .with_refresh_token_ttl(get("refresh-token-ttl"))
        .with_staging(matches.get_flag("staging"))
        .with_google_client_id(get("google-client-id"))
        .with_google_client_id_ios(get("google-client-id-ios"))
        .with_apple_bundle_id(get("apple-bundle-id"));

    // Fail on malformed durations at startup, not at first login.
    config.access_token_ttl()?;
    config.refresh_token_ttl()?;

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "fleetpass",
            "--dsn",
            "postgres://localhost/fleetpass",
            "--jwt-secret",
            "secret",
            "--staging",
            "--access-token-ttl",
            "30m",
        ]);
        let action = handler(&matches).unwrap();
        let Action::Server { port, dsn, config } = action;
        assert_eq!(port, 8080);
        assert_eq!(dsn, "postgres://localhost/fleetpass");
        assert!(config.staging());
        assert_eq!(
            config.access_token_ttl().unwrap(),
            std::time::Duration::from_secs(30 * 60)
        );
    }

    #[test]
    fn handler_rejects_bad_ttl() {
        let matches = commands::new().get_matches_from(vec![
            "fleetpass",
            "--dsn",
            "postgres://localhost/fleetpass",
            "--jwt-secret",
            "secret",
            "--access-token-ttl",
            "fortnight",
        ]);
        assert!(handler(&matches).is_err());
    }
}
