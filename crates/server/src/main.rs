use folio_server::{config, http};

#[tokio::main]
async fn main() {
    if std::env::args().nth(1).as_deref() == Some("hash-password") {
        print_password_hash();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match config::ServerConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let app = match http::router(config.clone()).await {
        Ok(app) => app,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("STARTUP_ERROR ERR_BIND_FAILED: {}", err);
            std::process::exit(1);
        }
    };

    tracing::info!(
        bind_addr = %config.bind_addr,
        data_file = %config.data_file.display(),
        "folio-server listening"
    );

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("STARTUP_ERROR ERR_SERVER_FAILED: {}", err);
        std::process::exit(1);
    }
}

/// Reads one line from stdin and prints the value for `FOLIO_ADMIN_PASSWORD_HASH`.
fn print_password_hash() {
    let mut line = String::new();
    if let Err(err) = std::io::stdin().read_line(&mut line) {
        eprintln!("ERR_INVALID_PARAMS: failed to read password from stdin: {}", err);
        std::process::exit(1);
    }

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        eprintln!("ERR_INVALID_PARAMS: password must be non-empty");
        std::process::exit(1);
    }

    println!(
        "{}",
        folio_auth::hash_password(password, folio_auth::DEFAULT_PBKDF2_ITERATIONS)
    );
}
