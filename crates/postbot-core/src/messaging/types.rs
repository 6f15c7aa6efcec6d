/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
}

/// Persistent reply keyboard shown under the input field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
    pub resize: bool,
    pub one_time: bool,
}

impl ReplyKeyboard {
    /// One button per row, resized to fit, kept visible after a press.
    pub fn one_per_row(labels: &[&str]) -> Self {
        Self {
            rows: labels.iter().map(|l| vec![l.to_string()]).collect(),
            resize: true,
            one_time: false,
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.rows.iter().flatten().any(|b| b == label)
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_photos: bool,
    pub max_message_len: usize,
    pub max_caption_len: usize,
}
