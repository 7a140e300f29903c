//! Operator-facing alert texts.
//!
//! Every text carries the account id and a timestamp rendered in the
//! operator's UTC offset. Texts are Markdown (the alert channel renders it).
//! Raw platform errors are never embedded, only the failure kind.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

use crate::classify::FailureKind;
use crate::config::{AlertConfig, Language};
use crate::expiry::{ExpiryRecord, ExpiryStatus};
use crate::registry::SessionStats;
use crate::types::AccountId;

#[derive(Debug, Clone)]
pub struct Messages {
    language: Language,
    offset: FixedOffset,
}

impl Default for Messages {
    fn default() -> Self {
        Messages::new(&AlertConfig::default())
    }
}

impl Messages {
    pub fn new(config: &AlertConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_hours.saturating_mul(3600))
            .unwrap_or_else(|| Utc.fix());
        Messages {
            language: config.language,
            offset,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn stamp(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.offset)
            .format("%H:%M:%S %d/%m/%Y")
            .to_string()
    }

    fn date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%d/%m/%Y").to_string()
    }

    fn kind_label(&self, kind: FailureKind) -> &'static str {
        match (self.language, kind) {
            (Language::Vi, FailureKind::Network) => "lỗi mạng",
            (Language::Vi, FailureKind::Auth) => "phiên đăng nhập hết hạn",
            (Language::Vi, FailureKind::Other) => "lỗi không xác định",
            (Language::En, FailureKind::Network) => "network error",
            (Language::En, FailureKind::Auth) => "session expired",
            (Language::En, FailureKind::Other) => "unknown error",
        }
    }

    /// Disconnect alert naming the failure kind.
    pub fn disconnect(&self, account: AccountId, kind: FailureKind, now: DateTime<Utc>) -> String {
        self.disconnect_with_reason(account, self.kind_label(kind), now)
    }

    pub fn disconnect_with_reason(&self, account: AccountId, reason: &str, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        match self.language {
            Language::Vi => format!(
                "🚨 *TÀI KHOẢN MẤT KẾT NỐI*\n\n📱 Account ID: `{account}`\n⏰ Thời gian: {stamp}\n❌ Lý do: {reason}\n\n⚠️ Vui lòng quét mã QR để đăng nhập lại."
            ),
            Language::En => format!(
                "🚨 *ACCOUNT DISCONNECTED*\n\n📱 Account ID: `{account}`\n⏰ Time: {stamp}\n❌ Reason: {reason}\n\n⚠️ Please scan the QR code to log in again."
            ),
        }
    }

    pub fn network_warning(&self, account: AccountId, failures: u32, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        match self.language {
            Language::Vi => format!(
                "⚠️ *CẢNH BÁO MẠNG*\n\n📱 Account ID: `{account}`\n⏰ Thời gian: {stamp}\n🌐 {failures} lần kiểm tra liên tiếp thất bại\n\nHệ thống đang thử kết nối lại..."
            ),
            Language::En => format!(
                "⚠️ *NETWORK WARNING*\n\n📱 Account ID: `{account}`\n⏰ Time: {stamp}\n🌐 {failures} consecutive health checks failed\n\nReconnecting..."
            ),
        }
    }

    pub fn probe_warning(&self, account: AccountId, kind: FailureKind, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        let reason = self.kind_label(kind);
        match self.language {
            Language::Vi => format!(
                "⚠️ *CẢNH BÁO KẾT NỐI*\n\n📱 Account ID: `{account}`\n⏰ Thời gian: {stamp}\n❌ Lý do: {reason}\n\nHệ thống đang thử kết nối lại..."
            ),
            Language::En => format!(
                "⚠️ *CONNECTION WARNING*\n\n📱 Account ID: `{account}`\n⏰ Time: {stamp}\n❌ Reason: {reason}\n\nReconnecting..."
            ),
        }
    }

    pub fn restored(&self, account: AccountId, platform_id: Option<&str>, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        let id_line = platform_id
            .filter(|id| !id.is_empty())
            .map(|id| format!("\n📞 Platform ID: `{id}`"))
            .unwrap_or_default();
        match self.language {
            Language::Vi => format!(
                "✅ *ĐÃ KẾT NỐI LẠI*\n\n📱 Account ID: `{account}`{id_line}\n⏰ Thời gian: {stamp}\n\n🎉 Kết nối đã được khôi phục."
            ),
            Language::En => format!(
                "✅ *RECONNECTED*\n\n📱 Account ID: `{account}`{id_line}\n⏰ Time: {stamp}\n\n🎉 The session is back online."
            ),
        }
    }

    pub fn reauth_caption(&self, account: AccountId, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        match self.language {
            Language::Vi => format!(
                "📱 *MÃ QR ĐĂNG NHẬP*\n\nAccount ID: `{account}`\n⏰ Tạo lúc: {stamp}\n\n⚠️ Quét mã này bằng ứng dụng để đăng nhập lại.\n⏳ Mã chỉ có hiệu lực trong thời gian ngắn."
            ),
            Language::En => format!(
                "📱 *LOGIN QR CODE*\n\nAccount ID: `{account}`\n⏰ Created: {stamp}\n\n⚠️ Scan this code with the app to log in again.\n⏳ The code expires shortly."
            ),
        }
    }

    /// `None` for `Ok` records: nothing to tell the operator.
    pub fn expiry(&self, record: &ExpiryRecord, now: DateTime<Utc>) -> Option<String> {
        let account = record.account_id;
        let stamp = self.stamp(now);
        let days = record.days_remaining;
        let date = self.date(record.expiry_date);
        let body = match (self.language, record.status) {
            (_, ExpiryStatus::Ok) => return None,
            (Language::Vi, ExpiryStatus::Expired) => {
                "🔴 Cookie đã HẾT HẠN.\nVui lòng đăng nhập lại ngay.".to_string()
            }
            (Language::Vi, ExpiryStatus::Critical) => format!(
                "🟠 Cookie sẽ hết hạn sau {days} ngày ({date}).\nVui lòng đăng nhập lại sớm."
            ),
            (Language::Vi, ExpiryStatus::Warning) => format!(
                "🟡 Cookie sẽ hết hạn sau {days} ngày ({date}).\nHãy chuẩn bị đăng nhập lại."
            ),
            (Language::En, ExpiryStatus::Expired) => {
                "🔴 The cookie has EXPIRED.\nPlease log in again now.".to_string()
            }
            (Language::En, ExpiryStatus::Critical) => format!(
                "🟠 The cookie expires in {days} day(s) ({date}).\nPlease log in again soon."
            ),
            (Language::En, ExpiryStatus::Warning) => format!(
                "🟡 The cookie expires in {days} day(s) ({date}).\nPlan to log in again."
            ),
        };
        let title = match self.language {
            Language::Vi => "CẢNH BÁO COOKIE",
            Language::En => "COOKIE WARNING",
        };
        Some(format!("⏳ *{title}*\n\n📱 Account ID: `{account}`\n⏰ {stamp}\n\n{body}"))
    }

    pub fn status_report(
        &self,
        account: AccountId,
        platform_id: Option<&str>,
        uptime: Duration,
        stats: &SessionStats,
        now: DateTime<Utc>,
    ) -> String {
        let stamp = self.stamp(now);
        let uptime = format_uptime(uptime);
        let platform_id = platform_id.unwrap_or("N/A");
        let SessionStats {
            incoming,
            outgoing,
            reports_sent,
            keep_alives,
        } = *stats;
        match self.language {
            Language::Vi => format!(
                "📊 *BÁO CÁO TRẠNG THÁI*\n\n📱 Account ID: `{account}`\n📞 Platform ID: `{platform_id}`\n⏰ Thời gian: {stamp}\n\n⏱️ Uptime: {uptime}\n📥 Tin nhắn nhận: {incoming}\n📤 Tin nhắn gửi: {outgoing}\n💓 Keepalive: {keep_alives}\n#️⃣ Báo cáo số {reports_sent}"
            ),
            Language::En => format!(
                "📊 *STATUS REPORT*\n\n📱 Account ID: `{account}`\n📞 Platform ID: `{platform_id}`\n⏰ Time: {stamp}\n\n⏱️ Uptime: {uptime}\n📥 Received: {incoming}\n📤 Sent: {outgoing}\n💓 Keepalives: {keep_alives}\n#️⃣ Report #{reports_sent}"
            ),
        }
    }

    pub fn test_alert(&self, account: AccountId, now: DateTime<Utc>) -> String {
        let stamp = self.stamp(now);
        match self.language {
            Language::Vi => format!(
                "🧪 *KIỂM TRA KÊNH CẢNH BÁO*\n\n📱 Account ID: `{account}`\n⏰ Thời gian: {stamp}\n\n✅ Kênh cảnh báo hoạt động."
            ),
            Language::En => format!(
                "🧪 *ALERT CHANNEL TEST*\n\n📱 Account ID: `{account}`\n⏰ Time: {stamp}\n\n✅ The alert channel works."
            ),
        }
    }
}

/// `1d 2h 3m`, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total_minutes = uptime.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
