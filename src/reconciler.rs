//! Decides, for one session and one platform status, whether to join a
//! running application, drop the current binding, or leave it alone.

use crate::adapters::ApplicationDescriptor;
use crate::protocol::{PlatformStatus, RunningApplication};

/// What the reconciler needs to know about a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub descriptors: &'a [ApplicationDescriptor],
    /// Generic descriptor, present when the session accepts any
    /// media-capable receiver.
    pub generic: Option<&'a ApplicationDescriptor>,
    /// App id of the current binding, if any.
    pub bound_app_id: Option<&'a str>,
    pub launching: bool,
}

#[derive(Debug, Clone)]
pub enum ReconcileAction {
    Keep,
    Join {
        application: RunningApplication,
        descriptor: ApplicationDescriptor,
    },
    Unjoin,
}

impl ReconcileAction {
    pub fn is_keep(&self) -> bool {
        matches!(self, ReconcileAction::Keep)
    }
}

fn is_bound_to(view: &SessionView<'_>, application: &RunningApplication) -> bool {
    view.bound_app_id
        .is_some_and(|bound| bound.eq_ignore_ascii_case(&application.app_id))
}

/// Plans the binding change for one session.
///
/// Specific application matches win over the generic media fallback. A
/// binding that still matches a running application is kept even when
/// other candidates are running, and a session with a launch in flight is
/// never touched.
pub fn plan(view: &SessionView<'_>, status: &PlatformStatus) -> ReconcileAction {
    if view.launching {
        return ReconcileAction::Keep;
    }

    let specific: Vec<(&RunningApplication, &ApplicationDescriptor)> = status
        .applications
        .iter()
        .filter_map(|application| {
            view.descriptors
                .iter()
                .find(|descriptor| descriptor.matches_app_id(&application.app_id))
                .map(|descriptor| (application, descriptor))
        })
        .collect();
    if !specific.is_empty() {
        if specific
            .iter()
            .any(|(application, _)| is_bound_to(view, application))
        {
            return ReconcileAction::Keep;
        }
        let (application, descriptor) = specific[0];
        return ReconcileAction::Join {
            application: application.clone(),
            descriptor: descriptor.clone(),
        };
    }

    if let Some(generic) = view.generic {
        let media_apps: Vec<&RunningApplication> = status
            .applications
            .iter()
            .filter(|application| application.is_media_capable())
            .collect();
        if let Some(first) = media_apps.first() {
            if media_apps
                .iter()
                .any(|application| is_bound_to(view, application))
            {
                return ReconcileAction::Keep;
            }
            return ReconcileAction::Join {
                application: (*first).clone(),
                descriptor: generic.clone(),
            };
        }
    }

    if view.bound_app_id.is_some() {
        ReconcileAction::Unjoin
    } else {
        ReconcileAction::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AppCatalog;
    use crate::config::TtsConfig;
    use crate::test_support::{media_app, plain_app, status_with};

    struct Fixture {
        catalog: AppCatalog,
        descriptors: Vec<ApplicationDescriptor>,
    }

    fn fixture(keys: &[&str]) -> Fixture {
        let catalog = AppCatalog::builtin(&TtsConfig::default());
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let descriptors = catalog.select(&keys);
        Fixture {
            catalog,
            descriptors,
        }
    }

    fn view<'a>(
        fixture: &'a Fixture,
        accepts_generic: bool,
        bound_app_id: Option<&'a str>,
        launching: bool,
    ) -> SessionView<'a> {
        SessionView {
            descriptors: &fixture.descriptors,
            generic: accepts_generic.then(|| fixture.catalog.generic()),
            bound_app_id,
            launching,
        }
    }

    #[test]
    fn test_unbound_session_joins_matching_application() {
        let fixture = fixture(&["default_media", "youtube"]);
        let status = status_with(vec![plain_app("ABCDEF01"), media_app("233637DE")]);
        match plan(&view(&fixture, false, None, false), &status) {
            ReconcileAction::Join {
                application,
                descriptor,
            } => {
                assert_eq!(application.app_id, "233637DE");
                assert_eq!(descriptor.key, "youtube");
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_already_bound_application_is_kept() {
        let fixture = fixture(&["default_media"]);
        let status = status_with(vec![media_app("CC1AD845")]);
        assert!(plan(&view(&fixture, true, Some("CC1AD845"), false), &status).is_keep());
    }

    #[test]
    fn test_launching_session_is_never_touched() {
        let fixture = fixture(&["default_media"]);
        let status = status_with(vec![media_app("CC1AD845")]);
        assert!(plan(&view(&fixture, true, None, true), &status).is_keep());
        let empty = status_with(vec![]);
        assert!(plan(&view(&fixture, true, Some("5C3F0A3C"), true), &empty).is_keep());
    }

    #[test]
    fn test_generic_fallback_joins_media_capable_application() {
        let fixture = fixture(&["default_media"]);
        let status = status_with(vec![plain_app("ABCDEF01"), media_app("FEEDBEEF")]);
        match plan(&view(&fixture, true, None, false), &status) {
            ReconcileAction::Join {
                application,
                descriptor,
            } => {
                assert_eq!(application.app_id, "FEEDBEEF");
                assert!(descriptor.app_id.is_none());
            }
            other => panic!("expected generic join, got {:?}", other),
        }
        // Without generic acceptance nothing matches.
        assert!(plan(&view(&fixture, false, None, false), &status).is_keep());
    }

    #[test]
    fn test_bound_session_unjoins_when_application_disappears() {
        let fixture = fixture(&["default_media"]);
        let status = status_with(vec![plain_app("ABCDEF01")]);
        assert!(matches!(
            plan(&view(&fixture, true, Some("CC1AD845"), false), &status),
            ReconcileAction::Unjoin
        ));
    }

    #[test]
    fn test_specific_match_replaces_generic_binding() {
        let fixture = fixture(&["default_media"]);
        let status = status_with(vec![media_app("FEEDBEEF"), media_app("CC1AD845")]);
        match plan(&view(&fixture, true, Some("FEEDBEEF"), false), &status) {
            ReconcileAction::Join { application, .. } => {
                assert_eq!(application.app_id, "CC1AD845")
            }
            other => panic!("expected join, got {:?}", other),
        }
    }
}
