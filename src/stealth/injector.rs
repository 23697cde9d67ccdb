//! Init-script assembly
//!
//! Turns an [`Identity`] plus a set of evasion toggles into one script
//! bundle that runs before any page script on every navigation. The
//! navigator/geometry overrides are data-driven: a table of patch
//! descriptors (target object, property, getter expression) rendered
//! uniformly, so each entry is independently testable and the catalog
//! reads as data, not script soup.

use super::evasions::{self, identity_payload};
use super::identity::Identity;

/// One property interception: `target.property` answered by `getter`,
/// an expression evaluated against the embedded `fp` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchDescriptor {
    pub target: &'static str,
    pub property: &'static str,
    pub getter: &'static str,
}

impl PatchDescriptor {
    /// Render to a guarded `Object.defineProperty` call. The getter is
    /// registered with the toString mask so the patch itself cannot be
    /// found by introspection.
    fn render(&self) -> String {
        format!(
            "try {{ Object.defineProperty({target}, '{prop}', {{ \
             get: maskNative(() => {getter}, 'get {prop}'), configurable: true }}); }} catch (e) {{}}",
            target = self.target,
            prop = self.property,
            getter = self.getter,
        )
    }
}

/// Navigator-level identity properties. Defined on the prototype so
/// `Object.getOwnPropertyNames(navigator)` stays empty, like a real
/// browser.
pub const NAVIGATOR_PATCHES: &[PatchDescriptor] = &[
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "platform",
        getter: "fp.platform",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "languages",
        getter: "Object.freeze([...fp.languages])",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "language",
        getter: "fp.languages[0]",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "vendor",
        getter: "'Google Inc.'",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "deviceMemory",
        getter: "fp.deviceMemory",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "hardwareConcurrency",
        getter: "fp.hardwareConcurrency",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "maxTouchPoints",
        getter: "fp.maxTouchPoints",
    },
    PatchDescriptor {
        target: "Navigator.prototype",
        property: "doNotTrack",
        getter: "fp.doNotTrack",
    },
];

/// Screen and outer-window geometry matching the identity
pub const GEOMETRY_PATCHES: &[PatchDescriptor] = &[
    PatchDescriptor {
        target: "screen",
        property: "width",
        getter: "fp.screen.width",
    },
    PatchDescriptor {
        target: "screen",
        property: "height",
        getter: "fp.screen.height",
    },
    PatchDescriptor {
        target: "screen",
        property: "availWidth",
        getter: "fp.screen.width",
    },
    PatchDescriptor {
        target: "screen",
        property: "availHeight",
        getter: "fp.screen.height - 40",
    },
    PatchDescriptor {
        target: "screen",
        property: "colorDepth",
        getter: "fp.colorDepth",
    },
    PatchDescriptor {
        target: "screen",
        property: "pixelDepth",
        getter: "fp.colorDepth",
    },
    PatchDescriptor {
        target: "window",
        property: "devicePixelRatio",
        getter: "fp.pixelRatio",
    },
    PatchDescriptor {
        target: "window",
        property: "outerWidth",
        getter: "fp.screen.width",
    },
    PatchDescriptor {
        target: "window",
        property: "outerHeight",
        getter: "fp.screen.height",
    },
];

/// Which evasion families go into the bundle. All on by default.
#[derive(Debug, Clone)]
pub struct EvasionToggles {
    pub hide_webdriver: bool,
    pub hide_automation_markers: bool,
    pub spoof_chrome_runtime: bool,
    pub spoof_navigator: bool,
    pub spoof_plugins: bool,
    pub spoof_permissions: bool,
    pub spoof_webgl: bool,
    pub canvas_noise: bool,
    pub audio_noise: bool,
    pub spoof_battery: bool,
    pub spoof_connection: bool,
    pub spoof_geometry: bool,
    pub jitter_timers: bool,
    pub patch_iframes: bool,
    pub neutralize_device_apis: bool,
    pub spoof_voices: bool,
    pub webrtc_relay_only: bool,
    pub webgl_precision_noise: bool,
    pub keyboard_passthrough: bool,
    pub storage_quota_noise: bool,
    pub rect_noise: bool,
    pub math_noise: bool,
    pub pin_timezone: bool,
    pub pin_visibility: bool,
    pub limit_font_probes: bool,
    pub mask_tostring: bool,
}

impl Default for EvasionToggles {
    fn default() -> Self {
        Self {
            hide_webdriver: true,
            hide_automation_markers: true,
            spoof_chrome_runtime: true,
            spoof_navigator: true,
            spoof_plugins: true,
            spoof_permissions: true,
            spoof_webgl: true,
            canvas_noise: true,
            audio_noise: true,
            spoof_battery: true,
            spoof_connection: true,
            spoof_geometry: true,
            jitter_timers: true,
            patch_iframes: true,
            neutralize_device_apis: true,
            spoof_voices: true,
            webrtc_relay_only: true,
            webgl_precision_noise: true,
            keyboard_passthrough: true,
            storage_quota_noise: true,
            rect_noise: true,
            math_noise: true,
            pin_timezone: true,
            pin_visibility: true,
            limit_font_probes: true,
            mask_tostring: true,
        }
    }
}

fn render_patches(descriptors: &[PatchDescriptor]) -> String {
    descriptors
        .iter()
        .map(PatchDescriptor::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the page-initialization bundle for one identity.
///
/// Deterministic: the same identity always yields the same script, so a
/// browsing session answers repeated fingerprint queries consistently.
pub fn build_init_script(identity: &Identity, toggles: &EvasionToggles) -> String {
    let mut blocks: Vec<String> = Vec::new();

    if toggles.hide_webdriver {
        blocks.push(evasions::WEBDRIVER.into());
    }
    if toggles.hide_automation_markers {
        blocks.push(evasions::CDC_MARKERS.into());
    }
    if toggles.spoof_chrome_runtime {
        blocks.push(evasions::CHROME_RUNTIME.into());
    }
    if toggles.spoof_navigator {
        blocks.push(render_patches(NAVIGATOR_PATCHES));
    }
    if toggles.spoof_plugins {
        blocks.push(evasions::PLUGINS.into());
    }
    if toggles.spoof_permissions {
        blocks.push(evasions::PERMISSIONS.into());
    }
    if toggles.spoof_webgl {
        blocks.push(evasions::WEBGL_PARAMS.into());
    }
    if toggles.canvas_noise {
        blocks.push(evasions::CANVAS_NOISE.into());
    }
    if toggles.audio_noise {
        blocks.push(evasions::AUDIO_NOISE.into());
    }
    if toggles.spoof_battery {
        blocks.push(evasions::BATTERY.into());
    }
    if toggles.spoof_connection {
        blocks.push(evasions::CONNECTION.into());
    }
    if toggles.spoof_geometry {
        blocks.push(render_patches(GEOMETRY_PATCHES));
    }
    if toggles.jitter_timers {
        blocks.push(evasions::TIMER_JITTER.into());
    }
    if toggles.patch_iframes {
        blocks.push(evasions::IFRAME_INHERIT.into());
    }
    if toggles.neutralize_device_apis {
        blocks.push(evasions::DEVICE_APIS.into());
    }
    if toggles.spoof_voices {
        blocks.push(evasions::SPEECH_VOICES.into());
    }
    if toggles.webrtc_relay_only {
        blocks.push(evasions::WEBRTC_RELAY.into());
    }
    if toggles.webgl_precision_noise {
        blocks.push(evasions::WEBGL_PRECISION.into());
    }
    if toggles.keyboard_passthrough {
        blocks.push(evasions::KEYBOARD_LAYOUT.into());
    }
    if toggles.storage_quota_noise {
        blocks.push(evasions::STORAGE_QUOTA.into());
    }
    if toggles.rect_noise {
        blocks.push(evasions::RECT_NOISE.into());
    }
    if toggles.math_noise {
        blocks.push(evasions::MATH_NOISE.into());
    }
    if toggles.pin_timezone {
        blocks.push(evasions::TIMEZONE_PIN.into());
    }
    if toggles.pin_visibility {
        blocks.push(evasions::VISIBILITY.into());
    }
    if toggles.limit_font_probes {
        blocks.push(evasions::FONT_PROBES.into());
    }
    // The toString mask goes last so it covers every patch above
    if toggles.mask_tostring {
        blocks.push(evasions::TOSTRING_MASK.into());
    }

    // Each block in its own scope; `const` names cannot collide
    let body = blocks
        .iter()
        .map(|b| format!("{{\n{}\n}}", b))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "(function() {{\n'use strict';\nconst fp = {payload};\n\
         const maskedNatives = new WeakMap();\n\
         const maskNative = (fn, name) => {{ maskedNatives.set(fn, name); return fn; }};\n\
         {body}\n}})();",
        payload = identity_payload(identity),
        body = body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_is_an_iife() {
        let identity = Identity::generate(Some("iife"));
        let script = build_init_script(&identity, &EvasionToggles::default());
        assert!(script.starts_with("(function()"));
        assert!(script.ends_with("})();"));
    }

    #[test]
    fn test_bundle_embeds_identity_values() {
        let identity = Identity::generate(Some("embed"));
        let script = build_init_script(&identity, &EvasionToggles::default());
        assert!(script.contains(&identity.platform));
        assert!(script.contains(&identity.webgl_renderer));
        assert!(script.contains(&identity.timezone));
        assert!(script.contains(&identity.canvas_seed.to_string()));
    }

    #[test]
    fn test_bundle_is_deterministic_per_identity() {
        let identity = Identity::generate(Some("stable"));
        let toggles = EvasionToggles::default();
        assert_eq!(
            build_init_script(&identity, &toggles),
            build_init_script(&identity, &toggles)
        );
    }

    #[test]
    fn test_toggles_remove_blocks() {
        let identity = Identity::generate(Some("toggles"));
        let full = build_init_script(&identity, &EvasionToggles::default());
        assert!(full.contains("getChannelData"));
        assert!(full.contains("UNMASKED") || full.contains("37445"));

        let trimmed = build_init_script(
            &identity,
            &EvasionToggles {
                audio_noise: false,
                spoof_webgl: false,
                ..EvasionToggles::default()
            },
        );
        assert!(!trimmed.contains("getChannelData"));
        assert!(!trimmed.contains("37445"));
    }

    #[test]
    fn test_navigator_patches_render_as_define_property() {
        let rendered = super::render_patches(NAVIGATOR_PATCHES);
        assert!(rendered.contains("Object.defineProperty(Navigator.prototype, 'platform'"));
        assert!(rendered.contains("fp.hardwareConcurrency"));
        // one guarded definition per descriptor
        assert_eq!(
            rendered.matches("Object.defineProperty").count(),
            NAVIGATOR_PATCHES.len()
        );
    }

    #[test]
    fn test_full_bundle_covers_core_surfaces() {
        let identity = Identity::generate(Some("coverage"));
        let script = build_init_script(&identity, &EvasionToggles::default());
        for marker in [
            "webdriver",
            "cdc_",
            "window.chrome",
            "PluginArray",
            "Permissions",
            "HTMLCanvasElement",
            "AudioBuffer",
            "getBattery",
            "RTCPeerConnection",
            "speechSynthesis",
            "getBoundingClientRect",
            "DateTimeFormat",
            "[native code]",
        ] {
            assert!(script.contains(marker), "bundle missing {}", marker);
        }
    }
}
