use crate::db::repo::DEFAULT_LINK_CHUNK_SIZE;
use crate::domain::UserId;
use chrono_tz::Tz;
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_MARKET_TIMEZONE: Tz = chrono_tz::America::New_York;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Users whose orders the batch runner reconstructs, in order.
    pub users: Vec<UserId>,
    /// Timezone market sessions are evaluated in.
    pub market_timezone: Tz,
    pub link_chunk_size: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let market_timezone = match env_map.get("MARKET_TIMEZONE") {
            Some(name) => name.trim().parse::<Tz>().map_err(|_| {
                ConfigError::InvalidValue(
                    "MARKET_TIMEZONE".to_string(),
                    format!("unknown IANA timezone {}", name),
                )
            })?,
            None => DEFAULT_MARKET_TIMEZONE,
        };

        let link_chunk_size = match env_map.get("LINK_CHUNK_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "LINK_CHUNK_SIZE".to_string(),
                        "must be a positive integer".to_string(),
                    ))
                }
            },
            None => DEFAULT_LINK_CHUNK_SIZE,
        };

        let users = parse_users_from_map(&env_map)?;

        Ok(Config {
            database_path,
            users,
            market_timezone,
            link_chunk_size,
        })
    }
}

/// `RECONSTRUCT_USERS` (comma separated) wins over `RECONSTRUCT_USERS_FILE`
/// (one per line). Neither set means no users.
fn parse_users_from_map(env_map: &HashMap<String, String>) -> Result<Vec<UserId>, ConfigError> {
    let raw: Vec<String> = if let Some(users_str) = env_map.get("RECONSTRUCT_USERS") {
        users_str.split(',').map(str::to_string).collect()
    } else if let Some(file_path) = env_map.get("RECONSTRUCT_USERS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "RECONSTRUCT_USERS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        content.lines().map(str::to_string).collect()
    } else {
        Vec::new()
    };

    let mut users: Vec<UserId> = Vec::new();
    for user in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let user = UserId::new(user);
        if !users.contains(&user) {
            users.push(user);
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.database_path, "/tmp/test.db");
        assert!(config.users.is_empty());
        assert_eq!(config.market_timezone, chrono_tz::America::New_York);
        assert_eq!(config.link_chunk_size, 500);
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_market_timezone() {
        let mut env_map = setup_required_env();
        env_map.insert("MARKET_TIMEZONE".to_string(), "Mars/Olympus".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "MARKET_TIMEZONE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_custom_market_timezone() {
        let mut env_map = setup_required_env();
        env_map.insert("MARKET_TIMEZONE".to_string(), "Europe/London".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.market_timezone, chrono_tz::Europe::London);
    }

    #[test]
    fn test_invalid_link_chunk_size() {
        for bad in ["0", "-3", "lots"] {
            let mut env_map = setup_required_env();
            env_map.insert("LINK_CHUNK_SIZE".to_string(), bad.to_string());
            match Config::from_env_map(env_map) {
                Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "LINK_CHUNK_SIZE"),
                _ => panic!("Expected InvalidValue error for {}", bad),
            }
        }
    }

    #[test]
    fn test_users_from_list_trims_and_dedups() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "RECONSTRUCT_USERS".to_string(),
            " alice, bob,,alice ".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.users, vec![UserId::new("alice"), UserId::new("bob")]);
    }

    #[test]
    fn test_users_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice\n\n  carol  ").unwrap();

        let mut env_map = setup_required_env();
        env_map.insert(
            "RECONSTRUCT_USERS_FILE".to_string(),
            file.path().to_string_lossy().to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.users, vec![UserId::new("alice"), UserId::new("carol")]);
    }

    #[test]
    fn test_unreadable_users_file() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "RECONSTRUCT_USERS_FILE".to_string(),
            "/nonexistent/users.txt".to_string(),
        );
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "RECONSTRUCT_USERS_FILE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
