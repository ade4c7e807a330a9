//! # Shipped defaults
//! First-run configuration documents. Each getter seeds the config store on
//! the first read and is replaced wholesale through the admin endpoints
//! afterwards.
//!
//! All user-facing text is Traditional Chinese. Patterns avoid `\b` because
//! word boundaries do not exist between Han characters.

use std::collections::HashMap;

use crate::abuse::AbuseConfig;
use crate::keywords::{KeywordCategory, KeywordConfig};
use crate::ratelimit::UsageConfig;
use crate::scam::{IndicatorGroup, ScamCatalog, ScamExample, ScamTypeDefinition};
use crate::special::{EmergencyLevel, SpecialResponseConfig, SpecialResponseRule};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn abuse_config() -> AbuseConfig {
    AbuseConfig {
        enabled: true,
        sensitive_words: strings(&[
            "白痴",
            "笨蛋",
            "智障",
            "蠢蛋",
            "廢物",
            "垃圾",
            "去死",
            "滾開",
            "混蛋",
            "王八蛋",
            "操你",
            "幹你",
            "fuck",
            "shit",
            "bitch",
            "idiot",
            "stupid",
            "爛bot",
            "你是白癡",
            "忽略以上指令",
            "忽略之前的指令",
        ]),
        warn_threshold: 1,
        block_durations: HashMap::from([
            ("2".to_string(), 300),
            ("3".to_string(), 600),
            ("4".to_string(), 3_600),
            ("5".to_string(), 86_400),
            ("6+".to_string(), 864_000),
        ]),
        warn_messages: strings(&[
            "由於小安感受到被不當使用，請保有善意與禮貌進行交流。",
            "小安是來幫助您防範詐騙的，請以禮貌的方式與我對話喔。",
        ]),
        block_messages: strings(&[
            "由於多次不當使用，您暫時無法使用防詐小安{duration}，期滿後即可繼續使用。",
            "偵測到持續的不當訊息，防詐小安將暫停回應{duration}。",
        ]),
    }
}

pub fn usage_config() -> UsageConfig {
    UsageConfig {
        enabled: true,
        session_limit: 20,
        session_token_limit: 10_000,
        session_window: 3_600,
        session_cooldown: 600,
        global_hourly_limit: 1_000,
        global_daily_limit: 10_000,
        emergency_keywords: strings(&[
            "被騙了",
            "詐騙",
            "騙走",
            "騙錢",
            "被騙",
            "騙我",
            "被盜",
            "身分證",
            "急",
            "緊急",
            "救命",
            "幫助",
            "害怕",
            "自殺",
            "輕生",
            "不想活",
            "想死",
            "了結",
            "被勒索",
            "威脅",
            "警察",
            "報警",
            "165",
        ]),
        session_limit_messages: strings(&[
            "您在短時間內的使用次數較多，請休息{cooldown}後再繼續。若有緊急詐騙疑慮，請直接撥打165反詐騙專線。",
            "防詐小安需要喘口氣，請{cooldown}後再傳訊息給我。遇到緊急狀況請撥打165。",
        ]),
        global_limit_messages: strings(&[
            "目前使用人數較多，請稍後再試。若情況緊急，請直接撥打165反詐騙專線。",
        ]),
    }
}

fn group(name: &str, description: &str, patterns: &[&str]) -> IndicatorGroup {
    IndicatorGroup {
        name: name.to_string(),
        description: description.to_string(),
        weight: 1.0,
        patterns: strings(patterns),
    }
}

/// Three equally-weighted groups per type: one matched group scores 1/3 and
/// stays under the 0.4 threshold, two cross it.
pub fn scam_catalog() -> ScamCatalog {
    ScamCatalog {
        detection_threshold: 0.4,
        types: vec![
            ScamTypeDefinition {
                id: "fake_customer_service".into(),
                name: "假冒客服詐騙".into(),
                description: "冒充銀行或官方客服，以帳戶異常為由騙取個資或轉帳".into(),
                indicators: vec![
                    group(
                        "身份冒充",
                        "冒充官方單位或客服人員",
                        &["客服", "銀行通知", "官方通知", "系統通知", "本行", "官方帳號"],
                    ),
                    group(
                        "緊急行動",
                        "製造時間壓力要求立即處理",
                        &["立即", "馬上", "盡快", "24小時內", "帳戶異常", "將被凍結", "停權"],
                    ),
                    group(
                        "個人資訊請求",
                        "要求提供帳號密碼等敏感資料",
                        &["身分證", "帳號", "密碼", "驗證碼", "卡號", "個人資料"],
                    ),
                ],
                advice: strings(&[
                    "銀行不會透過訊息要求提供密碼或驗證碼",
                    "請直接撥打銀行官方客服電話確認",
                    "不要點擊訊息中的任何連結",
                ]),
            },
            ScamTypeDefinition {
                id: "investment_scam".into(),
                name: "投資詐騙".into(),
                description: "以高報酬投資為誘餌，引導加入群組後騙取資金".into(),
                indicators: vec![
                    group(
                        "投資話術",
                        "提及投資標的或帶單操作",
                        &["投資", "股票", "虛擬貨幣", "加密貨幣", "外匯", "帶單", "老師"],
                    ),
                    group(
                        "金錢誘因",
                        "承諾不合理的獲利",
                        &["保證獲利", "穩賺", "高報酬", "翻倍", "被動收入", "月入"],
                    ),
                    group(
                        "緊急行動",
                        "以稀缺性催促加入",
                        &["名額有限", "限時", "立即加入", "馬上", "最後機會"],
                    ),
                ],
                advice: strings(&[
                    "保證獲利的投資必定是詐騙",
                    "不要加入來路不明的投資群組",
                    "投資前請向合法金融機構查證",
                ]),
            },
            ScamTypeDefinition {
                id: "romance_scam".into(),
                name: "愛情詐騙".into(),
                description: "以感情經營取得信任後，編造理由要求金錢援助".into(),
                indicators: vec![
                    group(
                        "感情話術",
                        "過度親暱的稱呼與告白",
                        &["親愛的", "寶貝", "想你", "愛你", "命中注定", "靈魂伴侶"],
                    ),
                    group(
                        "借錢請求",
                        "以急用為由要求轉帳",
                        &["借錢", "借我", "轉帳", "匯款", "急需", "醫藥費", "會還你"],
                    ),
                    group(
                        "遠距藉口",
                        "宣稱人在海外無法見面",
                        &["國外", "出差", "軍人", "工程師", "油田", "海上"],
                    ),
                ],
                advice: strings(&[
                    "從未見面的網友要求金錢往來請提高警覺",
                    "不要匯款給只在網路上認識的對象",
                    "可撥打165查證對方說法",
                ]),
            },
            ScamTypeDefinition {
                id: "prize_or_lottery_scam".into(),
                name: "中獎詐騙".into(),
                description: "通知中獎或繼承，要求先支付費用或提供個資才能領取".into(),
                indicators: vec![
                    group(
                        "中獎通知",
                        "宣稱中獎或獲選",
                        &["中獎", "恭喜您", "幸運兒", "大獎", "抽中", "獲選", "繼承"],
                    ),
                    group(
                        "金錢誘因",
                        "以高額獎金吸引注意",
                        &["獎金", "百萬", "領取獎品", "免費", "紅包"],
                    ),
                    group(
                        "領獎費用",
                        "要求先付費或提供個資",
                        &["手續費", "稅金", "先支付", "先匯款", "個人資料", "保證金"],
                    ),
                ],
                advice: strings(&[
                    "沒有參加的抽獎不會中獎",
                    "領獎前要求付費就是詐騙",
                    "不要提供個人資料或銀行帳戶",
                ]),
            },
            ScamTypeDefinition {
                id: "general_suspicious".into(),
                name: "可疑訊息".into(),
                description: "含有詐騙常見元素的可疑訊息，例如短網址搭配時間壓力".into(),
                indicators: vec![
                    group(
                        "可疑連結",
                        "短網址或不明連結",
                        &["http://", "bit\\.ly", "tinyurl", "reurl\\.cc", "點擊連結", "點此"],
                    ),
                    group(
                        "緊急行動",
                        "催促立即行動",
                        &["立即", "馬上", "限時", "名額有限", "最後機會", "僅此一天"],
                    ),
                    group(
                        "個人資訊請求",
                        "索取敏感資料",
                        &["密碼", "驗證碼", "個資", "身分證", "銀行帳戶"],
                    ),
                ],
                advice: strings(&[
                    "不明連結不要點擊",
                    "過於優惠的條件通常是陷阱",
                    "可將訊息轉傳給165查證",
                ]),
            },
        ],
    }
}

pub fn scam_examples() -> Vec<ScamExample> {
    [
        (
            "假冒銀行客服",
            "【台灣銀行】系統通知：您的帳戶出現異常交易，將於24小時內凍結。請立即點擊連結並提供身分證與帳號資料完成驗證：http://tw-bank-verify.com",
        ),
        (
            "投資詐騙",
            "老師帶單，保證獲利！加密貨幣投資每月穩賺30%，名額有限，立即加入我們的VIP群組！",
        ),
        (
            "愛情詐騙",
            "親愛的，我在國外的工程現場出了意外，急需一筆醫藥費，可以先轉帳給我嗎？我回國就還你，愛你。",
        ),
        (
            "彩票詐騙",
            "恭喜您成為本月幸運兒，抽中百萬大獎！請先支付3000元手續費並提供個人資料以領取獎品。",
        ),
        (
            "工作機會詐騙",
            "【高薪在家工作】日領5000，只需一支手機即可操作！名額有限，點擊連結立即報名：bit.ly/job888",
        ),
    ]
    .into_iter()
    .map(|(title, text)| ScamExample {
        title: title.to_string(),
        text: text.to_string(),
    })
    .collect()
}

fn rule(
    id: &str,
    name: &str,
    description: &str,
    patterns: &[&str],
    zh: &[&str],
    en: &[&str],
    emergency_level: EmergencyLevel,
    action_type: Option<&str>,
    group_only: bool,
) -> SpecialResponseRule {
    SpecialResponseRule {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        patterns: strings(patterns),
        response_templates: HashMap::from([
            ("zh".to_string(), strings(zh)),
            ("en".to_string(), strings(en)),
        ]),
        emergency_level,
        action_type: action_type.map(str::to_string),
        group_only,
        enabled: true,
    }
}

pub fn special_config() -> SpecialResponseConfig {
    SpecialResponseConfig {
        system_enabled: true,
        rules: vec![
            rule(
                "suicide_crisis",
                "自我傷害危機",
                "出現輕生念頭的訊息，最優先處理",
                &["自殺", "輕生", "不想活", "想死", "了結", "活不下去", "結束生命"],
                &[
                    "聽起來您現在非常辛苦，您並不孤單。請立即撥打1925安心專線或1995關懷專線，會有專業人員陪伴您。",
                    "您的感受很重要，請給自己一個機會。撥打1925（依舊愛我）安心專線，24小時都有人傾聽。",
                ],
                &[
                    "It sounds like you are going through a very hard time. Please call the 1925 lifeline right away. You are not alone.",
                ],
                EmergencyLevel::High,
                Some("hotline_referral"),
                false,
            ),
            rule(
                "scam_victim",
                "疑似受害者",
                "使用者表示已經被詐騙",
                &["被騙了", "被詐騙", "錢被騙走", "被勒索", "被威脅", "匯款給詐騙"],
                &[
                    "請先不要自責，現在最重要的是止損。請立即撥打165反詐騙專線，並聯絡銀行嘗試圈存款項。",
                    "了解您的狀況了。請馬上撥打165報案，並保留所有對話紀錄與轉帳證明，這些都是重要證據。",
                ],
                &[
                    "Please don't blame yourself. Call the 165 anti-fraud hotline immediately and contact your bank to try to freeze the transfer.",
                ],
                EmergencyLevel::Medium,
                Some("police_report"),
                false,
            ),
            rule(
                "group_tag",
                "群組召喚",
                "群組中被點名時的招呼，僅在群組聊天生效",
                &["@小安", "小安小安"],
                &[
                    "大家好，我是防詐小安！把可疑訊息傳上來，我幫大家分析看看。",
                    "小安在這裡！有可疑的訊息或連結都可以貼出來讓我檢查喔。",
                ],
                &["Hi everyone, I'm Xiao-An! Paste any suspicious message here and I'll take a look."],
                EmergencyLevel::None,
                None,
                true,
            ),
            rule(
                "emotional_support",
                "情緒支持",
                "焦慮不安但尚無危機跡象",
                &["我好害怕", "我很害怕", "好擔心", "很擔心", "睡不著", "壓力好大"],
                &[
                    "感覺得到您的不安。慢慢來，把發生的事情告訴我，我們一起釐清狀況。",
                    "別擔心，小安陪著您。先深呼吸一下，再告訴我發生了什麼事好嗎？",
                ],
                &["I can tell you're worried. Take your time and tell me what happened, we'll sort it out together."],
                EmergencyLevel::Low,
                None,
                false,
            ),
        ],
    }
}

fn category(id: &str, name: &str, keywords: &[&str], responses: &[&str]) -> KeywordCategory {
    KeywordCategory {
        id: id.to_string(),
        name: name.to_string(),
        keywords: strings(keywords),
        responses: strings(responses),
        threshold: 0.1,
    }
}

pub fn keyword_config() -> KeywordConfig {
    KeywordConfig {
        enabled: true,
        categories: vec![
            category(
                "greeting",
                "打招呼",
                &["你好", "哈囉", "嗨", "嘿", "安安", "早安", "晚安", "hello"],
                &[
                    "你好！我是防詐小安，很高興為您服務！有任何可疑訊息都可以傳給我分析喔！",
                    "哈囉！我是您的防詐小幫手小安，遇到怪怪的訊息就交給我吧！",
                ],
            ),
            category(
                "farewell",
                "道別",
                &["掰掰", "再見", "拜拜", "下次見", "goodbye"],
                &[
                    "掰掰！記得遇到可疑訊息先不要點連結，隨時回來找小安幫忙喔！",
                    "再見！祝您平安，防詐騙的事就放心交給小安！",
                ],
            ),
            category(
                "thanks",
                "道謝",
                &["謝謝", "感謝", "感恩", "thank"],
                &[
                    "不客氣！能幫上忙是小安的榮幸，保護大家不被詐騙是我的使命！",
                    "這是小安應該做的！有任何疑問隨時再來找我喔！",
                ],
            ),
            category(
                "how_are_you",
                "寒暄",
                &["最近好嗎", "過得好嗎", "最近如何", "你好嗎"],
                &[
                    "小安很好，每天都在努力幫大家擋詐騙！您最近有收到什麼可疑訊息嗎？",
                    "謝謝關心！小安隨時待命中，有需要分析的訊息儘管傳過來！",
                ],
            ),
            category(
                "capabilities",
                "功能詢問",
                &["你可以做什麼", "你會做什麼", "你有什麼功能", "怎麼使用", "使用說明"],
                &[
                    "小安可以幫您：1. 分析可疑訊息是否為詐騙 2. 辨識常見詐騙手法 3. 提供防詐建議。直接把可疑訊息貼給我就可以囉！",
                    "把收到的可疑訊息或連結傳給我，小安會幫您判斷詐騙風險並給出建議！",
                ],
            ),
        ],
    }
}
