//! Browser Launcher
//!
//! Opens the forwarded dashboard in the system browser.

use tokio::process::Command;

/// Platform opener program and its arguments for `url`
fn opener_command(url: &str) -> Option<(&'static str, Vec<String>)> {
    if cfg!(target_os = "macos") {
        Some(("open", vec![url.to_string()]))
    } else if cfg!(target_os = "windows") {
        Some((
            "rundll32",
            vec!["url.dll,FileProtocolHandler".to_string(), url.to_string()],
        ))
    } else if cfg!(unix) {
        Some(("xdg-open", vec![url.to_string()]))
    } else {
        None
    }
}

/// Open `url` in the default browser.
///
/// Never fails: when no opener can be started the URL is printed so the
/// user can open it by hand. Returns whether an opener was started.
pub fn open_url(url: &str) -> bool {
    let result = match opener_command(url) {
        Some((program, args)) => Command::new(program)
            .args(&args)
            .spawn()
            .map(|_| ())
            .map_err(|e| format!("{}: {}", program, e)),
        None => Err("unsupported platform".to_string()),
    };

    match result {
        Ok(()) => {
            tracing::debug!("Opened browser at {}", url);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to open browser: {}", e);
            println!("Please manually open: {}", url);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opener_command_passes_url() {
        let url = "https://localhost:5602/_dashboards/";
        let (program, args) = opener_command(url).unwrap();
        assert!(!program.is_empty());
        assert_eq!(args.last().map(String::as_str), Some(url));
    }
}
