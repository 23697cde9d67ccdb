//! Evasion script blocks
//!
//! Each block patches one family of browser introspection surfaces. The
//! injector composes the enabled blocks into a single IIFE that runs
//! before any page script on every navigation, frames included.
//!
//! Blocks read the current identity from an `fp` object the injector
//! embeds at the top of the bundle, so one script text serves every
//! identity. Every noise function is seeded from the identity - repeated
//! fingerprinting of the same identity must be stable; only *different*
//! identities diverge. Non-determinism inside one session is a bug, not
//! camouflage.

use serde_json::json;

use super::identity::Identity;

/// Render the identity payload the bundle binds as `fp`.
///
/// Battery durations use `null` for "Infinity" (JSON has no infinities);
/// the battery block converts on read.
pub(crate) fn identity_payload(identity: &Identity) -> String {
    json!({
        "platform": identity.platform,
        "languages": identity.languages,
        "deviceMemory": identity.device_memory,
        "hardwareConcurrency": identity.hardware_concurrency,
        "webglVendor": identity.webgl_vendor,
        "webglRenderer": identity.webgl_renderer,
        "colorDepth": identity.color_depth,
        "pixelRatio": identity.pixel_ratio,
        "doNotTrack": identity.do_not_track,
        "maxTouchPoints": identity.max_touch_points,
        "audioSeed": identity.audio_seed,
        "canvasSeed": identity.canvas_seed,
        "fonts": identity.fonts,
        "battery": {
            "charging": identity.battery.charging,
            "chargingTime": identity.battery.charging_time_s,
            "dischargingTime": identity.battery.discharging_time_s,
            "level": identity.battery.level,
        },
        "connection": {
            "effectiveType": identity.connection.effective_type,
            "downlink": identity.connection.downlink,
            "rtt": identity.connection.rtt,
            "saveData": identity.connection.save_data,
        },
        "screen": { "width": identity.screen_width, "height": identity.screen_height },
        "viewport": { "width": identity.viewport_width, "height": identity.viewport_height },
        "timezone": identity.timezone,
        "locale": identity.locale,
    })
    .to_string()
}

/// Hide the webdriver flag and scrub driver-specific globals
pub const WEBDRIVER: &str = r#"
try {
    Object.defineProperty(Object.getPrototypeOf(navigator), 'webdriver', {
        get: () => false,
        configurable: true,
        enumerable: true
    });
} catch (e) {}

const automationGlobals = [
    '__playwright', '__pw_manual', '__PW_inspect', '__playwright_evaluation_script__',
    'callPhantom', '_phantom', 'phantom', '__nightmare',
    'domAutomation', 'domAutomationController',
    '_selenium', '_Selenium_IDE_Recorder', 'calledSelenium', 'callSelenium',
    '__driver_evaluate', '__webdriver_evaluate', '__selenium_evaluate', '__fxdriver_evaluate',
    '__driver_unwrapped', '__webdriver_unwrapped', '__selenium_unwrapped', '__fxdriver_unwrapped',
    '__webdriver_script_function', '__webdriver_script_func', '__webdriver_script_fn',
    '__webdriverFunc', 'webdriverCommand', '_WEBDRIVER_ELEM_CACHE',
    '__lastWatirAlert', '__lastWatirConfirm', '__lastWatirPrompt',
    '$chrome_asyncScriptInfo', '$wdc_', 'ChromeDriverw'
];
for (const prop of automationGlobals) {
    try { if (prop in window) delete window[prop]; } catch (e) {}
}

const stackDescriptor = Object.getOwnPropertyDescriptor(Error.prototype, 'stack');
if (stackDescriptor && stackDescriptor.get) {
    Object.defineProperty(Error.prototype, 'stack', {
        get: maskNative(function() {
            let stack = stackDescriptor.get.call(this);
            if (typeof stack === 'string') {
                stack = stack.split('\n').filter(line =>
                    !line.includes('__puppeteer') &&
                    !line.includes('__playwright') &&
                    !line.includes('devtools://') &&
                    !line.includes('__webdriver')
                ).join('\n');
            }
            return stack;
        }, 'get stack'),
        configurable: true
    });
}
"#;

/// Scrub cdc_-style protocol markers from window and document, and keep
/// enumeration APIs from revealing them
pub const CDC_MARKERS: &str = r#"
const cdcPattern = /^cdc_|^\$cdc_|^__webdriver|^__selenium|^__driver|^\$chrome_|^\$wdc_/;

const scrub = (obj) => {
    for (const prop of Object.getOwnPropertyNames(obj)) {
        if (cdcPattern.test(prop)) {
            try { delete obj[prop]; } catch (e) {}
        }
    }
};
scrub(window);
scrub(document);

const realGetOwnPropertyNames = Object.getOwnPropertyNames;
Object.getOwnPropertyNames = maskNative(function(obj) {
    const names = realGetOwnPropertyNames.call(this, obj);
    if (obj === window || obj === document) {
        return names.filter(name => !cdcPattern.test(name));
    }
    return names;
}, 'getOwnPropertyNames');

const realKeys = Object.keys;
Object.keys = maskNative(function(obj) {
    const keys = realKeys.call(this, obj);
    if (obj === window || obj === document) {
        return keys.filter(key => !cdcPattern.test(key));
    }
    return keys;
}, 'keys');
"#;

/// Plausible window.chrome object (headless Chrome lacks most of it)
pub const CHROME_RUNTIME: &str = r#"
if (!window.chrome) window.chrome = {};

window.chrome.app = {
    isInstalled: false,
    InstallState: { DISABLED: 'disabled', INSTALLED: 'installed', NOT_INSTALLED: 'not_installed' },
    RunningState: { CANNOT_RUN: 'cannot_run', READY_TO_RUN: 'ready_to_run', RUNNING: 'running' },
    getDetails: function() { return null; },
    getIsInstalled: function() { return false; },
    runningState: function() { return 'cannot_run'; }
};

window.chrome.csi = function() {
    return {
        startE: Date.now(),
        onloadT: Date.now(),
        pageT: performance.now(),
        tran: 15
    };
};

window.chrome.loadTimes = function() {
    const base = Date.now() / 1000;
    return {
        commitLoadTime: base - 1.2,
        connectionInfo: 'h2',
        finishDocumentLoadTime: base - 0.6,
        finishLoadTime: base - 0.3,
        firstPaintAfterLoadTime: 0,
        firstPaintTime: base - 0.9,
        navigationType: 'Other',
        npnNegotiatedProtocol: 'h2',
        requestTime: base - 2.1,
        startLoadTime: base - 1.8,
        wasAlternateProtocolAvailable: false,
        wasFetchedViaSpdy: true,
        wasNpnNegotiated: true
    };
};

window.chrome.runtime = {
    connect: function() {
        return {
            onDisconnect: { addListener: function() {} },
            onMessage: { addListener: function() {} },
            postMessage: function() {}
        };
    },
    sendMessage: function() {},
    id: undefined
};
"#;

/// PDF-viewer plugin table shaped like a real Chrome install
pub const PLUGINS: &str = r#"
const makePlugin = (name, description, filename, mimes) => {
    const plugin = Object.create(Plugin.prototype);
    Object.defineProperties(plugin, {
        name: { value: name, enumerable: true },
        description: { value: description, enumerable: true },
        filename: { value: filename, enumerable: true },
        length: { value: mimes.length, enumerable: true }
    });
    mimes.forEach((m, i) => {
        const mime = Object.create(MimeType.prototype);
        Object.defineProperties(mime, {
            type: { value: m, enumerable: true },
            suffixes: { value: 'pdf', enumerable: true },
            description: { value: description, enumerable: true },
            enabledPlugin: { value: plugin, enumerable: true }
        });
        Object.defineProperty(plugin, i, { value: mime, enumerable: true });
        Object.defineProperty(plugin, m, { value: mime, enumerable: false });
    });
    return plugin;
};

const pluginList = [
    makePlugin('PDF Viewer', 'Portable Document Format', 'internal-pdf-viewer', ['application/pdf', 'text/pdf']),
    makePlugin('Chrome PDF Viewer', 'Portable Document Format', 'internal-pdf-viewer', ['application/pdf']),
    makePlugin('Chromium PDF Viewer', 'Portable Document Format', 'internal-pdf-viewer', ['application/pdf']),
    makePlugin('Microsoft Edge PDF Viewer', 'Portable Document Format', 'internal-pdf-viewer', ['application/pdf']),
    makePlugin('WebKit built-in PDF', 'Portable Document Format', 'internal-pdf-viewer', ['application/pdf'])
];

const pluginArray = Object.create(PluginArray.prototype);
pluginList.forEach((plugin, i) => {
    Object.defineProperty(pluginArray, i, { value: plugin, enumerable: true });
    Object.defineProperty(pluginArray, plugin.name, { value: plugin, enumerable: false });
});
Object.defineProperty(pluginArray, 'length', { value: pluginList.length, enumerable: true });
pluginArray.item = function(i) { return this[i] || null; };
pluginArray.namedItem = function(name) { return this[name] || null; };
pluginArray.refresh = function() {};

Object.defineProperty(Navigator.prototype, 'plugins', {
    get: maskNative(() => pluginArray, 'get plugins'),
    configurable: true
});
"#;

/// Believable per-permission states: sensors prompt/deny, background
/// machinery granted
pub const PERMISSIONS: &str = r#"
if (navigator.permissions && navigator.permissions.query) {
    const permissionStates = {
        'notifications': 'prompt',
        'geolocation': 'prompt',
        'camera': 'prompt',
        'microphone': 'prompt',
        'accelerometer': 'denied',
        'gyroscope': 'denied',
        'magnetometer': 'denied',
        'ambient-light-sensor': 'denied',
        'background-sync': 'granted',
        'clipboard-read': 'prompt',
        'clipboard-write': 'granted',
        'persistent-storage': 'prompt',
        'midi': 'prompt'
    };

    Permissions.prototype.query = maskNative(function(parameters) {
        const state = permissionStates[parameters.name] || 'prompt';
        return Promise.resolve({
            state: state,
            name: parameters.name,
            onchange: null,
            addEventListener: function() {},
            removeEventListener: function() {},
            dispatchEvent: function() { return true; }
        });
    }, 'query');
}
"#;

/// Return the identity's GPU strings for the two unmasked WebGL
/// parameter codes fingerprinters ask for
pub const WEBGL_PARAMS: &str = r#"
const spoofGetParameter = (proto) => {
    const realGetParameter = proto.getParameter;
    proto.getParameter = maskNative(function(param) {
        if (param === 37445) return fp.webglVendor;   // UNMASKED_VENDOR_WEBGL
        if (param === 37446) return fp.webglRenderer; // UNMASKED_RENDERER_WEBGL
        return realGetParameter.call(this, param);
    }, 'getParameter');
};
try { spoofGetParameter(WebGLRenderingContext.prototype); } catch (e) {}
try { if (typeof WebGL2RenderingContext !== 'undefined') spoofGetParameter(WebGL2RenderingContext.prototype); } catch (e) {}
"#;

/// Seeded, bounded canvas noise: stable for one identity, different
/// across identities, invisible to the eye
pub const CANVAS_NOISE: &str = r#"
const canvasNoise = (data) => {
    for (let i = 0; i < data.length; i += 4) {
        const noise = ((fp.canvasSeed * (i + 1)) % 3) - 1; // -1, 0 or 1
        data[i] = Math.max(0, Math.min(255, data[i] + noise));
    }
};

const realToDataURL = HTMLCanvasElement.prototype.toDataURL;
HTMLCanvasElement.prototype.toDataURL = maskNative(function(type, quality) {
    const ctx = this.getContext('2d');
    if (ctx && this.width > 0 && this.height > 0) {
        const imageData = ctx.getImageData(0, 0, this.width, this.height);
        canvasNoise(imageData.data);
        ctx.putImageData(imageData, 0, 0);
    }
    return realToDataURL.call(this, type, quality);
}, 'toDataURL');

const realGetImageData = CanvasRenderingContext2D.prototype.getImageData;
CanvasRenderingContext2D.prototype.getImageData = maskNative(function(...args) {
    const imageData = realGetImageData.apply(this, args);
    canvasNoise(imageData.data);
    return imageData;
}, 'getImageData');
"#;

/// Seeded audio-buffer noise, far below audibility
pub const AUDIO_NOISE: &str = r#"
const realGetChannelData = AudioBuffer.prototype.getChannelData;
AudioBuffer.prototype.getChannelData = maskNative(function(channel) {
    const data = realGetChannelData.call(this, channel);
    for (let i = 0; i < data.length; i += 100) {
        data[i] = data[i] + (fp.audioSeed * 0.0000001);
    }
    return data;
}, 'getChannelData');

const realCopyFromChannel = AudioBuffer.prototype.copyFromChannel;
AudioBuffer.prototype.copyFromChannel = maskNative(function(destination, channel, start) {
    realCopyFromChannel.call(this, destination, channel, start || 0);
    for (let i = 0; i < destination.length; i += 100) {
        destination[i] = destination[i] + (fp.audioSeed * 0.0000001);
    }
}, 'copyFromChannel');
"#;

/// Battery API returns the identity's synthetic snapshot
pub const BATTERY: &str = r#"
if (navigator.getBattery) {
    const snapshot = {
        charging: fp.battery.charging,
        chargingTime: fp.battery.chargingTime === null ? Infinity : fp.battery.chargingTime,
        dischargingTime: fp.battery.dischargingTime === null ? Infinity : fp.battery.dischargingTime,
        level: fp.battery.level,
        onchargingchange: null,
        onchargingtimechange: null,
        ondischargingtimechange: null,
        onlevelchange: null,
        addEventListener: function() {},
        removeEventListener: function() {},
        dispatchEvent: function() { return true; }
    };
    Object.defineProperty(Navigator.prototype, 'getBattery', {
        value: maskNative(function() { return Promise.resolve(snapshot); }, 'getBattery'),
        configurable: true,
        writable: true
    });
}
"#;

/// Network Information API returns the identity's connection descriptor
pub const CONNECTION: &str = r#"
if (navigator.connection) {
    const connectionProps = {
        effectiveType: fp.connection.effectiveType,
        downlink: fp.connection.downlink,
        rtt: fp.connection.rtt,
        saveData: fp.connection.saveData
    };
    for (const [key, value] of Object.entries(connectionProps)) {
        try {
            Object.defineProperty(navigator.connection, key, {
                get: () => value,
                configurable: true,
                enumerable: true
            });
        } catch (e) {}
    }
}
"#;

/// Sub-millisecond jitter on high-resolution timers. The offset is
/// seeded, so in-session timing comparisons stay self-consistent.
pub const TIMER_JITTER: &str = r#"
const timerOffset = ((fp.canvasSeed % 997) + 1) / 1000000;
const realNow = performance.now.bind(performance);
performance.now = maskNative(function() {
    return realNow() + timerOffset;
}, 'now');
"#;

/// Child frames inherit the webdriver removal
pub const IFRAME_INHERIT: &str = r#"
const realCreateElement = document.createElement.bind(document);
document.createElement = maskNative(function(tagName, options) {
    const element = realCreateElement(tagName, options);
    if (String(tagName).toLowerCase() === 'iframe') {
        element.addEventListener('load', function() {
            try {
                if (element.contentWindow) {
                    Object.defineProperty(element.contentWindow.navigator, 'webdriver', {
                        get: () => false,
                        configurable: true
                    });
                }
            } catch (e) {}
        });
    }
    return element;
}, 'createElement');
"#;

/// Device enumeration returns empty or generic results instead of
/// erroring or exposing absence
pub const DEVICE_APIS: &str = r#"
if (navigator.mediaDevices && navigator.mediaDevices.enumerateDevices) {
    navigator.mediaDevices.enumerateDevices = maskNative(async function() {
        return ['audioinput', 'audiooutput', 'videoinput'].map((kind, i) => {
            const device = Object.create(MediaDeviceInfo.prototype);
            Object.defineProperties(device, {
                deviceId: { value: 'default', enumerable: true },
                groupId: { value: 'group_' + ((fp.canvasSeed + i) % 0xffff).toString(16), enumerable: true },
                kind: { value: kind, enumerable: true },
                label: { value: '', enumerable: true },
                toJSON: { value: function() { return { deviceId: 'default', kind: kind, label: '' }; } }
            });
            return device;
        });
    }, 'enumerateDevices');
}

if (navigator.usb) {
    navigator.usb.getDevices = async function() { return []; };
}
if (navigator.serial) {
    navigator.serial.getPorts = async function() { return []; };
}
if (navigator.hid) {
    navigator.hid.getDevices = async function() { return []; };
}
if (!navigator.bluetooth) {
    try {
        Object.defineProperty(Navigator.prototype, 'bluetooth', {
            get: () => ({
                getAvailability: () => Promise.resolve(false),
                requestDevice: () => Promise.reject(new DOMException('User cancelled', 'NotFoundError')),
                getDevices: () => Promise.resolve([])
            }),
            configurable: true
        });
    } catch (e) {}
} else {
    navigator.bluetooth.getAvailability = async function() { return false; };
}
navigator.getGamepads = maskNative(function() { return [null, null, null, null]; }, 'getGamepads');

const sensorClasses = [
    'Accelerometer', 'Gyroscope', 'Magnetometer',
    'AbsoluteOrientationSensor', 'RelativeOrientationSensor',
    'LinearAccelerationSensor', 'GravitySensor', 'AmbientLightSensor'
];
for (const name of sensorClasses) {
    if (window[name]) {
        const RealSensor = window[name];
        window[name] = function(...args) {
            const sensor = new RealSensor(...args);
            sensor.addEventListener = function() {};
            return sensor;
        };
        window[name].prototype = RealSensor.prototype;
    }
}
"#;

/// Headless Chrome ships zero speech voices; real Chrome has several
pub const SPEECH_VOICES: &str = r#"
if (typeof speechSynthesis !== 'undefined') {
    const voiceData = [
        { name: 'Microsoft David - English (United States)', lang: 'en-US', localService: true, default: true },
        { name: 'Microsoft Zira - English (United States)', lang: 'en-US', localService: true, default: false },
        { name: 'Microsoft Mark - English (United States)', lang: 'en-US', localService: true, default: false },
        { name: 'Google US English', lang: 'en-US', localService: false, default: false },
        { name: 'Google UK English Female', lang: 'en-GB', localService: false, default: false },
        { name: 'Google UK English Male', lang: 'en-GB', localService: false, default: false }
    ];
    const syntheticVoices = voiceData.map(v => {
        const voice = Object.create(SpeechSynthesisVoice.prototype);
        Object.defineProperties(voice, {
            name: { value: v.name, enumerable: true },
            lang: { value: v.lang, enumerable: true },
            localService: { value: v.localService, enumerable: true },
            default: { value: v.default, enumerable: true },
            voiceURI: { value: v.name, enumerable: true }
        });
        return voice;
    });
    const realGetVoices = speechSynthesis.getVoices.bind(speechSynthesis);
    speechSynthesis.getVoices = maskNative(function() {
        const voices = realGetVoices();
        return voices.length > 0 ? voices : syntheticVoices;
    }, 'getVoices');
}
"#;

/// Relay-only ICE policy keeps local addresses out of WebRTC candidates
pub const WEBRTC_RELAY: &str = r#"
if (typeof RTCPeerConnection !== 'undefined') {
    const RealRTCPeerConnection = RTCPeerConnection;
    window.RTCPeerConnection = function(config, constraints) {
        const patched = config ? { ...config } : {};
        patched.iceTransportPolicy = 'relay';
        return new RealRTCPeerConnection(patched, constraints);
    };
    window.RTCPeerConnection.prototype = RealRTCPeerConnection.prototype;
    for (const key of Object.keys(RealRTCPeerConnection)) {
        window.RTCPeerConnection[key] = RealRTCPeerConnection[key];
    }
    if (typeof webkitRTCPeerConnection !== 'undefined') {
        window.webkitRTCPeerConnection = window.RTCPeerConnection;
    }
}
"#;

/// Seeded noise on shader precision and extension ordering
pub const WEBGL_PRECISION: &str = r#"
const spoofPrecision = (proto) => {
    const realPrecision = proto.getShaderPrecisionFormat;
    proto.getShaderPrecisionFormat = maskNative(function(shaderType, precisionType) {
        const result = realPrecision.call(this, shaderType, precisionType);
        if (result) {
            return {
                rangeMin: result.rangeMin,
                rangeMax: result.rangeMax,
                precision: Math.max(0, result.precision + ((fp.canvasSeed % 3) - 1))
            };
        }
        return result;
    }, 'getShaderPrecisionFormat');

    const realExtensions = proto.getSupportedExtensions;
    proto.getSupportedExtensions = maskNative(function() {
        const extensions = realExtensions.call(this) || [];
        const shuffled = [...extensions];
        for (let i = shuffled.length - 1; i > 0; i--) {
            const j = (fp.canvasSeed * (i + 1)) % (i + 1);
            [shuffled[i], shuffled[j]] = [shuffled[j], shuffled[i]];
        }
        return shuffled;
    }, 'getSupportedExtensions');
};
try { spoofPrecision(WebGLRenderingContext.prototype); } catch (e) {}
try { if (typeof WebGL2RenderingContext !== 'undefined') spoofPrecision(WebGL2RenderingContext.prototype); } catch (e) {}
"#;

/// Keyboard layout map passes through unchanged (presence is what probes
/// check; absence flags headless)
pub const KEYBOARD_LAYOUT: &str = r#"
if (navigator.keyboard && navigator.keyboard.getLayoutMap) {
    const realGetLayoutMap = navigator.keyboard.getLayoutMap.bind(navigator.keyboard);
    navigator.keyboard.getLayoutMap = maskNative(async function() {
        return realGetLayoutMap();
    }, 'getLayoutMap');
}
"#;

/// Seeded storage quota instead of the default headless value
pub const STORAGE_QUOTA: &str = r#"
if (navigator.storage && navigator.storage.estimate) {
    const quota = (100 + (fp.canvasSeed % 50)) * 1024 * 1024 * 1024;
    const usage = (fp.canvasSeed % 100) * 1024 * 1024;
    navigator.storage.estimate = maskNative(async function() {
        return { quota: quota, usage: usage, usageDetails: {} };
    }, 'estimate');
}
"#;

/// Sub-pixel noise on element geometry queries
pub const RECT_NOISE: &str = r#"
const realGetBoundingClientRect = Element.prototype.getBoundingClientRect;
Element.prototype.getBoundingClientRect = maskNative(function() {
    const rect = realGetBoundingClientRect.call(this);
    const noise = ((fp.canvasSeed * (rect.width + 1) * (rect.height + 1)) % 1000) / 10000000;
    return {
        x: rect.x + noise,
        y: rect.y + noise,
        width: rect.width + noise,
        height: rect.height + noise,
        top: rect.top + noise,
        right: rect.right + noise,
        bottom: rect.bottom + noise,
        left: rect.left + noise,
        toJSON: rect.toJSON ? rect.toJSON.bind(rect) : undefined
    };
}, 'getBoundingClientRect');
"#;

/// Noise on trig functions, but only at the probe inputs fingerprinters
/// use, so normal page math is untouched
pub const MATH_NOISE: &str = r#"
const epsilon = 1e-15;
const mathNoise = (real, name) => maskNative(function(x) {
    const result = real(x);
    if (Math.abs(x - 0.5) < 0.0001) {
        return result + (fp.canvasSeed % 10) * epsilon;
    }
    return result;
}, name);
Math.sin = mathNoise(Math.sin, 'sin');
Math.cos = mathNoise(Math.cos, 'cos');
Math.tan = mathNoise(Math.tan, 'tan');
"#;

/// Intl timezone pinned to the identity so script-visible time agrees
/// with the context override
pub const TIMEZONE_PIN: &str = r#"
const RealDateTimeFormat = Intl.DateTimeFormat;
Intl.DateTimeFormat = function(locales, options) {
    const opts = options ? { ...options } : {};
    if (!opts.timeZone) opts.timeZone = fp.timezone;
    return new RealDateTimeFormat(locales || fp.locale, opts);
};
Intl.DateTimeFormat.prototype = RealDateTimeFormat.prototype;
Intl.DateTimeFormat.supportedLocalesOf = RealDateTimeFormat.supportedLocalesOf;
"#;

/// A page that is being watched is "visible" and "focused"
pub const VISIBILITY: &str = r#"
Object.defineProperty(document, 'hidden', { get: () => false, configurable: true });
Object.defineProperty(document, 'visibilityState', { get: () => 'visible', configurable: true });
document.hasFocus = maskNative(function() { return true; }, 'hasFocus');
"#;

/// Font probes answer from the identity's font subset, with a cap on
/// probe volume
pub const FONT_PROBES: &str = r#"
if (document.fonts && document.fonts.check) {
    const realCheck = document.fonts.check.bind(document.fonts);
    const probeHistory = new Set();
    document.fonts.check = maskNative(function(fontSpec, text) {
        if (probeHistory.size > 500) return false;
        probeHistory.add(fontSpec);
        const fontName = String(fontSpec).split(' ').pop().replace(/['"]/g, '');
        if (fp.fonts.some(f => fontName.toLowerCase().includes(f.toLowerCase()))) {
            return realCheck(fontSpec, text);
        }
        return false;
    }, 'check');
}
"#;

/// Patched natives still report as native code
pub const TOSTRING_MASK: &str = r#"
const realToString = Function.prototype.toString;
const toStringMask = function() {
    if (maskedNatives.has(this)) {
        const name = maskedNatives.get(this);
        return 'function ' + name.replace(/^get /, '') + '() { [native code] }';
    }
    if (this === toStringMask) {
        return 'function toString() { [native code] }';
    }
    return realToString.call(this);
};
Function.prototype.toString = toStringMask;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_payload_is_valid_json() {
        let identity = Identity::generate(Some("payload"));
        let payload = identity_payload(&identity);
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["platform"], identity.platform.as_str());
        assert_eq!(parsed["canvasSeed"], identity.canvas_seed);
        assert_eq!(parsed["webglRenderer"], identity.webgl_renderer.as_str());
    }

    #[test]
    fn test_payload_battery_infinity_encodes_as_null() {
        let mut identity = Identity::generate(Some("battery"));
        identity.battery.charging_time_s = None;
        let parsed: serde_json::Value =
            serde_json::from_str(&identity_payload(&identity)).unwrap();
        assert!(parsed["battery"]["chargingTime"].is_null());
    }

    #[test]
    fn test_noise_blocks_reference_seeds_not_math_random() {
        for block in [CANVAS_NOISE, AUDIO_NOISE, WEBGL_PRECISION, STORAGE_QUOTA, RECT_NOISE, MATH_NOISE] {
            assert!(
                !block.contains("Math.random"),
                "noise block must be seeded, not random"
            );
        }
        assert!(CANVAS_NOISE.contains("fp.canvasSeed"));
        assert!(AUDIO_NOISE.contains("fp.audioSeed"));
    }
}
