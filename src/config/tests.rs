use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.directory, PathBuf::from(DEFAULT_CACHE_DIR));
    assert_eq!(
        settings.cache.flush_debounce,
        Duration::from_millis(DEFAULT_FLUSH_DEBOUNCE_MS)
    );
}

#[test]
fn zero_debounce_is_accepted_as_eager() {
    let mut raw = RawSettings::default();
    raw.cache.flush_debounce_ms = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cache.flush_debounce.is_zero());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_log_level_names_the_key() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "logging.level"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn zero_port_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "server.port",
            ..
        })
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["furrow"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_cache_arguments() {
    let args = CliArgs::parse_from([
        "furrow",
        "serve",
        "--cache-enabled",
        "false",
        "--cache-directory",
        "/tmp/furrow",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(
                serve.overrides.cache.cache_directory.as_deref(),
                Some(std::path::Path::new("/tmp/furrow"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_hash_arguments() {
    let args = CliArgs::parse_from(["furrow", "hash", "nitrogen-balance", "/tmp/input.json"]);

    match args.command.expect("hash command") {
        Command::Hash(hash) => {
            assert_eq!(hash.kind, CalculationKind::NitrogenBalance);
            assert_eq!(hash.file, std::path::Path::new("/tmp/input.json"));
            assert_eq!(hash.schema_version, 1);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_cache_show_arguments() {
    let args = CliArgs::parse_from([
        "furrow",
        "cache",
        "show",
        "norm_filling",
        "--cache-directory",
        "/srv/cache",
    ]);

    match args.command.expect("cache command") {
        Command::Cache(CacheArgs {
            command: CacheCommand::Show(show),
        }) => {
            assert_eq!(show.kind, CalculationKind::NormFilling);
            assert_eq!(
                show.cache.cache_directory.as_deref(),
                Some(std::path::Path::new("/srv/cache"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn unknown_kind_is_a_parse_error() {
    assert!(CliArgs::try_parse_from(["furrow", "hash", "yield-forecast", "in.json"]).is_err());
}
