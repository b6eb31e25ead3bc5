//! Fixed facts about the score portal: pages, frames, form controls and the
//! text markers its responses carry.

/// Default portal root. Every page below is resolved against it.
pub const DEFAULT_BASE_URL: &str = "https://selcrs.nsysu.edu.tw/scoreqry/";

/// Pages, relative to the portal root.
pub mod pages {
    pub const LOGIN: &str = "sco_query_login.asp";
    pub const SCORE_DETAIL: &str = "sco_query.asp?action=700&KIND=1&LANGS=cht";
    pub const HISTORICAL_GRADES: &str = "sco_query.asp?action=700&KIND=2&LANGS=cht";
}

/// Named frames of the report pages.
pub mod frames {
    /// Holds the selection form (course radios, year/term selectors).
    pub const LISTING: &str = "mtn_down1";
    /// Receives the form's result document.
    pub const RESULT: &str = "mtn_down2";
}

/// CSS selectors for the login form.
pub mod login {
    pub const CAPTCHA_IMAGE: &str = r#"img[name="imgVC"]"#;
    pub const IDENTIFIER: &str = r#"input[name="SID"]"#;
    pub const SECRET: &str = r#"input[name="PASSWD"]"#;
    pub const CODE: &str = r#"input[name="ValidCode"]"#;
    pub const SUBMIT: &str = "input.login_btn_01";
}

/// Form control names on the report pages.
pub mod controls {
    pub const COURSE: &str = "CRSNO";
    pub const YEAR: &str = "SYEAR";
    pub const TERM: &str = "SEM";
    pub const SUBMIT: &str = "B1";
}

/// Text the portal uses to signal outcomes.
pub mod markers {
    /// Login dialog shown when the CAPTCHA code was wrong.
    pub const CAPTCHA_ERROR: &str = "驗證碼錯誤";
    /// Login dialog shown when the portal confirms a login.
    pub const LOGIN_SUCCESS: &str = "登入成功";
    /// Result body for a term without records.
    pub const NO_DATA: &str = "查無資料";
    /// Header cell present in the per-course grade listing.
    pub const GRADE_TABLE: &str = "課程編號";
    /// Label present in the term statistics block.
    pub const RANK_BLOCK: &str = "修習學分";
}

/// Field names prepended to every historical grade row.
pub mod fields {
    pub const YEAR: &str = "學年度";
    pub const TERM: &str = "學期";
}

/// CSS selector for an element with the given `name` attribute.
pub fn by_name(tag: &str, name: &str) -> String {
    format!(r#"{tag}[name="{}"]"#, css_escape(name))
}

/// CSS selector for the radio input of one course.
pub fn course_radio(code: &str) -> String {
    format!(
        r#"input[name="{}"][value="{}"]"#,
        controls::COURSE,
        css_escape(code)
    )
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
