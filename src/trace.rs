use std::ffi::CStr;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, fmt::MakeWriter, prelude::*, registry::LookupSpan,
};

/// Install the stderr trace subscriber when `filter` is given
///
/// The host's `RUST_LOG` is never consulted; the directive comes from the
/// shim's own variable. Returns whether a subscriber was installed.
pub fn init(filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return false;
    };
    tracing_subscriber::registry()
        .with(layer(std::io::stderr, filter))
        .try_init()
        .is_ok()
}

fn layer<S, W>(writer: W, filter: &str) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(EnvFilter::new(filter))
}

/// Record one redirection decision of a hooked call
///
/// Pass-throughs are logged too, so a debug trace lists every intercepted
/// path.
pub fn redirection(call: &str, from: &CStr, to: Option<&CStr>) {
    match to {
        Some(to) if to != from => tracing::debug!("{call} {from:?} --> {to:?}"),
        _ => tracing::debug!("{call} {from:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured(filter: &str, f: impl FnOnce()) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::registry().with(layer(move || writer.clone(), filter));
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn no_filter_installs_nothing() {
        assert!(!init(None));
    }

    #[test]
    fn debug_lists_redirected_and_unchanged_calls() {
        let out = captured("debug", || {
            redirection("open", c"/usr/share/a", Some(c"/b/usr/share/a"));
            redirection("stat", c"/etc/hosts", Some(c"/etc/hosts"));
            redirection("access", c"/tmp/x", None);
        });
        assert!(out.contains(r#"open "/usr/share/a" --> "/b/usr/share/a""#), "{out}");
        assert!(out.contains(r#"stat "/etc/hosts""#), "{out}");
        assert!(!out.contains(r#"stat "/etc/hosts" -->"#), "{out}");
        assert!(out.contains(r#"access "/tmp/x""#), "{out}");
    }

    #[test]
    fn info_filter_hides_decisions() {
        let out = captured("info", || {
            redirection("open", c"/usr/share/a", Some(c"/b/usr/share/a"));
        });
        assert!(out.is_empty(), "{out}");
    }
}
