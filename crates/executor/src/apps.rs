//! App name ↔ package mapping used by `Launch` and current-app detection.

const APP_PACKAGES: &[(&str, &str)] = &[
    ("微信", "com.tencent.mm"),
    ("WeChat", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("支付宝", "com.eg.android.AlipayGphone"),
    ("Alipay", "com.eg.android.AlipayGphone"),
    ("淘宝", "com.taobao.taobao"),
    ("Taobao", "com.taobao.taobao"),
    ("京东", "com.jingdong.app.mall"),
    ("美团", "com.sankuai.meituan"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("小红书", "com.xingin.xhs"),
    ("高德地图", "com.autonavi.minimap"),
    ("百度地图", "com.baidu.BaiduMap"),
    ("哔哩哔哩", "tv.danmaku.bili"),
    ("bilibili", "tv.danmaku.bili"),
    ("Chrome", "com.android.chrome"),
    ("Gmail", "com.google.android.gm"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("YouTube", "com.google.android.youtube"),
    ("Settings", "com.android.settings"),
    ("设置", "com.android.settings"),
    ("Camera", "com.android.camera"),
    ("相机", "com.android.camera"),
    ("Clock", "com.android.deskclock"),
    ("时钟", "com.android.deskclock"),
    ("Contacts", "com.android.contacts"),
    ("Messages", "com.google.android.apps.messaging"),
    ("Files", "com.android.documentsui"),
];

/// Package for a user-facing app name. Case-insensitive; a name that already
/// looks like a package is passed through.
pub fn package_for(app: &str) -> Option<&'static str> {
    let app = app.trim();
    APP_PACKAGES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(app))
        .map(|(_, package)| *package)
        .or_else(|| {
            APP_PACKAGES
                .iter()
                .find(|(_, package)| *package == app)
                .map(|(_, package)| *package)
        })
}

/// Current foreground app from `dumpsys window` output.
pub fn current_app(dumpsys: &str) -> String {
    for line in dumpsys.lines() {
        if !(line.contains("mCurrentFocus") || line.contains("mFocusedApp")) {
            continue;
        }
        if let Some((name, _)) = APP_PACKAGES.iter().find(|(_, p)| line.contains(p)) {
            return name.to_string();
        }
    }
    "System Home".to_string()
}
