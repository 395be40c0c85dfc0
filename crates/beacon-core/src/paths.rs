use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInputs {
    pub home_dir: PathBuf,
    pub xdg_config_home: Option<PathBuf>,
    pub beacon_dir_override: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconPaths {
    pub beacon_dir: PathBuf,

    pub log_path: PathBuf,
    pub session_file: PathBuf,

    pub config_dir: PathBuf,
    pub config_file: PathBuf,
}

pub fn compute_paths(inputs: PathInputs) -> BeaconPaths {
    let beacon_dir = inputs
        .beacon_dir_override
        .clone()
        .unwrap_or_else(|| inputs.home_dir.join(".beacon"));

    let config_base = match inputs.beacon_dir_override {
        Some(ref override_dir) => override_dir.join("config"),
        None => inputs
            .xdg_config_home
            .unwrap_or_else(|| inputs.home_dir.join(".config"))
            .join("beacon"),
    };

    BeaconPaths {
        log_path: beacon_dir.join("beacon.log"),
        // Holds the bearer token; lives next to the log, not the config.
        session_file: beacon_dir.join("session.json"),

        config_file: config_base.join("config.toml"),

        beacon_dir,
        config_dir: config_base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_paths_default() {
        let inputs = PathInputs {
            home_dir: PathBuf::from("/home/alice"),
            xdg_config_home: None,
            beacon_dir_override: None,
        };

        let got = compute_paths(inputs);
        assert_eq!(got.beacon_dir, PathBuf::from("/home/alice/.beacon"));
        assert_eq!(
            got.log_path,
            PathBuf::from("/home/alice/.beacon/beacon.log")
        );
        assert_eq!(
            got.session_file,
            PathBuf::from("/home/alice/.beacon/session.json")
        );
        assert_eq!(got.config_dir, PathBuf::from("/home/alice/.config/beacon"));
        assert_eq!(
            got.config_file,
            PathBuf::from("/home/alice/.config/beacon/config.toml")
        );
    }

    #[test]
    fn compute_paths_uses_xdg_config_home() {
        let inputs = PathInputs {
            home_dir: PathBuf::from("/home/alice"),
            xdg_config_home: Some(PathBuf::from("/tmp/xdg")),
            beacon_dir_override: None,
        };

        let got = compute_paths(inputs);
        assert_eq!(got.config_dir, PathBuf::from("/tmp/xdg/beacon"));
    }

    #[test]
    fn compute_paths_beacon_dir_override_overrides_config() {
        let inputs = PathInputs {
            home_dir: PathBuf::from("/home/alice"),
            xdg_config_home: Some(PathBuf::from("/tmp/xdg")),
            beacon_dir_override: Some(PathBuf::from("/tmp/beacon-dev")),
        };

        let got = compute_paths(inputs);
        assert_eq!(got.beacon_dir, PathBuf::from("/tmp/beacon-dev"));
        assert_eq!(got.config_dir, PathBuf::from("/tmp/beacon-dev/config"));
        assert_eq!(
            got.session_file,
            PathBuf::from("/tmp/beacon-dev/session.json")
        );
    }
}
