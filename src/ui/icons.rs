pub struct Icons;

impl Icons {
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const NODE: &str = "🔵";
    pub const LINK: &str = "🔗";
    pub const TAG: &str = "🏷️";
    pub const SEARCH: &str = "🔍";
    pub const DATABASE: &str = "🗄️";
    pub const PACKAGE: &str = "📦";
    pub const BROOM: &str = "🧹";
    pub const GLOBE: &str = "🌐";
    pub const CLOCK: &str = "⏱️";
}
