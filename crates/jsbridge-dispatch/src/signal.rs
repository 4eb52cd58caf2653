// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reserved signalling URLs.
//
// The page never really navigates to these; it points a hidden iframe at them
// so the native side sees a navigation request it can intercept:
//
//   https://__bridge_loaded__        runtime may be injected
//   https://__wvjb_queue_message__   outbound queue has messages to fetch
//
// The legacy `wvjbscheme://` scheme is reserved outright. Under `https` only
// the two hosts above are reserved; anything else is ordinary traffic.

use url::Url;

pub const LEGACY_SCHEME: &str = "wvjbscheme";
pub const SECURE_SCHEME: &str = "https";
pub const BRIDGE_LOADED_HOST: &str = "__bridge_loaded__";
pub const QUEUE_HAS_MESSAGE_HOST: &str = "__wvjb_queue_message__";

/// A navigation recognised as a message from the page's runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeSignal {
    RuntimeLoaded,
    QueueHasMessage,
    /// Reserved scheme, unrecognised command. Still never navigated to.
    Unknown(String),
}

/// Classify `url`. `None` means the navigation is not ours.
pub fn classify(url: &Url) -> Option<BridgeSignal> {
    let scheme = url.scheme().to_ascii_lowercase();
    if scheme != LEGACY_SCHEME && scheme != SECURE_SCHEME {
        return None;
    }

    let host = url.host_str().map(str::to_ascii_lowercase);
    match host.as_deref() {
        Some(BRIDGE_LOADED_HOST) => Some(BridgeSignal::RuntimeLoaded),
        Some(QUEUE_HAS_MESSAGE_HOST) => Some(BridgeSignal::QueueHasMessage),
        _ if scheme == LEGACY_SCHEME => Some(BridgeSignal::Unknown(url.to_string())),
        _ => None,
    }
}

/// The URL the page uses to announce `signal`.
pub fn signal_url(signal: &BridgeSignal) -> Option<Url> {
    let host = match signal {
        BridgeSignal::RuntimeLoaded => BRIDGE_LOADED_HOST,
        BridgeSignal::QueueHasMessage => QUEUE_HAS_MESSAGE_HOST,
        BridgeSignal::Unknown(_) => return None,
    };
    Url::parse(&format!("{SECURE_SCHEME}://{host}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[test]
    fn recognises_both_schemes() {
        for s in [
            "https://__bridge_loaded__",
            "wvjbscheme://__bridge_loaded__",
            "WVJBSCHEME://__BRIDGE_LOADED__",
            "HTTPS://__Bridge_Loaded__/",
        ] {
            assert_eq!(classify(&parse(s)), Some(BridgeSignal::RuntimeLoaded), "{s}");
        }
        assert_eq!(
            classify(&parse("https://__wvjb_queue_message__/")),
            Some(BridgeSignal::QueueHasMessage)
        );
        assert_eq!(
            classify(&parse("wvjbscheme://__WVJB_QUEUE_MESSAGE__")),
            Some(BridgeSignal::QueueHasMessage)
        );
    }

    #[test]
    fn unknown_legacy_command() {
        match classify(&parse("wvjbscheme://__something_else__")) {
            Some(BridgeSignal::Unknown(url)) => assert!(url.contains("__something_else__")),
            other => panic!("expected unknown signal, got {other:?}"),
        }
    }

    #[test]
    fn ordinary_traffic_passes() {
        assert_eq!(classify(&parse("https://example.com/__bridge_loaded__")), None);
        assert_eq!(classify(&parse("http://__bridge_loaded__")), None);
        assert_eq!(classify(&parse("file:///tmp/echo.html")), None);
    }

    #[test]
    fn signal_urls_classify_back() {
        for signal in [BridgeSignal::RuntimeLoaded, BridgeSignal::QueueHasMessage] {
            let url = signal_url(&signal).expect("url");
            assert_eq!(classify(&url), Some(signal));
        }
        assert!(signal_url(&BridgeSignal::Unknown("x".into())).is_none());
    }
}
