//! Anti-detection countermeasures for headless sessions.
//!
//! Each piece neutralizes one signal sites use to fingerprint automation:
//! the user agent, `navigator` properties, GPU strings, the permissions
//! query, and the absence of pointer movement.

use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::json;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

const GPU_PROFILES: &[(&str, &str)] = &[
    (
        "Google Inc. (NVIDIA)",
        "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 SUPER Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    (
        "Google Inc. (AMD)",
        "ANGLE (AMD, AMD Radeon RX 580 Series Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
];

/// Flags applied to every launch.
pub const BASE_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-translate",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
    "--window-size=1366,768",
    "--lang=en-US",
];

/// Per-session browser identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub platform: &'static str,
    pub languages: Vec<&'static str>,
    pub gpu_vendor: &'static str,
    pub gpu_renderer: &'static str,
    pub hardware_concurrency: u8,
}

impl Fingerprint {
    /// Random identity; `user_agent` overrides the pool when set.
    pub fn random(user_agent: Option<&str>) -> Self {
        let mut rng = rand::rng();
        let user_agent = user_agent
            .map(str::to_string)
            .or_else(|| USER_AGENTS.choose(&mut rng).map(|ua| ua.to_string()))
            .unwrap_or_default();
        let &(gpu_vendor, gpu_renderer) = GPU_PROFILES.choose(&mut rng).unwrap_or(&GPU_PROFILES[0]);

        Self {
            platform: platform_for(&user_agent),
            user_agent,
            languages: vec!["en-US", "en"],
            gpu_vendor,
            gpu_renderer,
            hardware_concurrency: [4u8, 8, 12, 16][rng.random_range(0..4)],
        }
    }

    /// Script evaluated before any page script on every new document.
    pub fn init_script(&self) -> String {
        let config = json!({
            "platform": self.platform,
            "languages": self.languages,
            "gpuVendor": self.gpu_vendor,
            "gpuRenderer": self.gpu_renderer,
            "hardwareConcurrency": self.hardware_concurrency,
        });
        format!("(() => {{\nconst cfg = {config};\n{INIT_SCRIPT_BODY}\n}})();")
    }
}

fn platform_for(user_agent: &str) -> &'static str {
    if user_agent.contains("Macintosh") {
        "MacIntel"
    } else if user_agent.contains("Linux") {
        "Linux x86_64"
    } else {
        "Win32"
    }
}

const INIT_SCRIPT_BODY: &str = r#"
const define = (obj, prop, value) =>
  Object.defineProperty(obj, prop, { get: () => value, configurable: true });

define(Navigator.prototype, 'webdriver', false);
define(Navigator.prototype, 'platform', cfg.platform);
define(Navigator.prototype, 'languages', Object.freeze(cfg.languages.slice()));
define(Navigator.prototype, 'language', cfg.languages[0]);
define(Navigator.prototype, 'hardwareConcurrency', cfg.hardwareConcurrency);

const fakePlugins = ['PDF Viewer', 'Chrome PDF Viewer', 'Chromium PDF Viewer'].map((name) => ({
  name, filename: 'internal-pdf-viewer', description: 'Portable Document Format', length: 1,
}));
define(Navigator.prototype, 'plugins', Object.freeze(fakePlugins));

if (!window.chrome) {
  window.chrome = { runtime: {}, app: { isInstalled: false }, csi: () => {}, loadTimes: () => ({}) };
}

if (navigator.permissions && navigator.permissions.query) {
  const originalQuery = navigator.permissions.query.bind(navigator.permissions);
  navigator.permissions.query = (parameters) =>
    parameters && parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission, onchange: null })
      : originalQuery(parameters);
}

const UNMASKED_VENDOR = 0x9245;
const UNMASKED_RENDERER = 0x9246;
for (const proto of [WebGLRenderingContext.prototype, (window.WebGL2RenderingContext || {}).prototype]) {
  if (!proto) continue;
  const getParameter = proto.getParameter;
  proto.getParameter = function (param) {
    if (param === UNMASKED_VENDOR) return cfg.gpuVendor;
    if (param === UNMASKED_RENDERER) return cfg.gpuRenderer;
    return getParameter.call(this, param);
  };
}
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn cubic_bezier(t: f64, p0: Point, p1: Point, p2: Point, p3: Point) -> Point {
    let u = 1.0 - t;
    let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
    Point {
        x: a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        y: a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    }
}

/// Curved pointer path from `start` to `end` with randomized control points.
/// Always `steps + 1` points, first and last exactly on the endpoints.
pub fn mouse_path(start: Point, end: Point, steps: usize) -> Vec<Point> {
    let mut rng = rand::rng();
    let mut control = || {
        Point::new(
            start.x + (end.x - start.x) * rng.random_range(0.2..0.8) + rng.random_range(-80.0..80.0),
            start.y + (end.y - start.y) * rng.random_range(0.2..0.8) + rng.random_range(-80.0..80.0),
        )
    };
    let (p1, p2) = (control(), control());
    let steps = steps.max(1);

    (0..=steps)
        .map(|i| cubic_bezier(i as f64 / steps as f64, start, p1, p2, end))
        .collect()
}

/// Random point inside a `width` x `height` viewport, away from the edges.
pub fn random_point(width: f64, height: f64) -> Point {
    let mut rng = rand::rng();
    Point::new(
        rng.random_range(width * 0.1..width * 0.9),
        rng.random_range(height * 0.1..height * 0.9),
    )
}
