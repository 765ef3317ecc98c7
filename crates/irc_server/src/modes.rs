//! Channel mode vocabulary: the five disjoint families from the spec, plus
//! the per-member prefix algebra and the batch-change request type the mode
//! engine consumes.

use std::fmt;

/// Channel-wide boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanMode {
    InviteOnly,
    Moderated,
    NoOutside,
    OpOnlyTopic,
    Persistent,
    Secret,
}

impl BooleanMode {
    pub const ALL: [BooleanMode; 6] = [
        BooleanMode::InviteOnly,
        BooleanMode::Moderated,
        BooleanMode::NoOutside,
        BooleanMode::OpOnlyTopic,
        BooleanMode::Persistent,
        BooleanMode::Secret,
    ];

    pub fn letter(self) -> char {
        match self {
            BooleanMode::InviteOnly => 'i',
            BooleanMode::Moderated => 'm',
            BooleanMode::NoOutside => 'n',
            BooleanMode::OpOnlyTopic => 't',
            BooleanMode::Persistent => 'P',
            BooleanMode::Secret => 's',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.letter() == c)
    }
}

/// Mask-list families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskListKind {
    Ban,
    Except,
    Invite,
}

impl MaskListKind {
    pub fn letter(self) -> char {
        match self {
            MaskListKind::Ban => 'b',
            MaskListKind::Except => 'e',
            MaskListKind::Invite => 'I',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'b' => Some(MaskListKind::Ban),
            'e' => Some(MaskListKind::Except),
            'I' => Some(MaskListKind::Invite),
            _ => None,
        }
    }
}

/// Per-member privilege prefix modes, ordered high -> low by privilege.
/// The derive order of the enum variants IS the privilege order: do not
/// reorder these without updating every place that relies on `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeMode {
    Voice,
    Halfop,
    Operator,
    Admin,
    Founder,
}

impl PrivilegeMode {
    /// High-to-low order, matching the prefix rendering rule in the spec.
    pub const HIGH_TO_LOW: [PrivilegeMode; 5] = [
        PrivilegeMode::Founder,
        PrivilegeMode::Admin,
        PrivilegeMode::Operator,
        PrivilegeMode::Halfop,
        PrivilegeMode::Voice,
    ];

    pub fn letter(self) -> char {
        match self {
            PrivilegeMode::Founder => 'q',
            PrivilegeMode::Admin => 'a',
            PrivilegeMode::Operator => 'o',
            PrivilegeMode::Halfop => 'h',
            PrivilegeMode::Voice => 'v',
        }
    }

    pub fn sigil(self) -> char {
        match self {
            PrivilegeMode::Founder => '~',
            PrivilegeMode::Admin => '&',
            PrivilegeMode::Operator => '@',
            PrivilegeMode::Halfop => '%',
            PrivilegeMode::Voice => '+',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        Self::HIGH_TO_LOW.into_iter().find(|m| m.letter() == c)
    }
}

/// The union of every mode kind the engine can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Boolean(BooleanMode),
    Key,
    UserLimit,
    Mask(MaskListKind),
    Privilege(PrivilegeMode),
}

impl ChannelMode {
    pub fn from_letter(c: char) -> Option<Self> {
        if let Some(b) = BooleanMode::from_letter(c) {
            return Some(ChannelMode::Boolean(b));
        }
        if let Some(m) = MaskListKind::from_letter(c) {
            return Some(ChannelMode::Mask(m));
        }
        if let Some(p) = PrivilegeMode::from_letter(c) {
            return Some(ChannelMode::Privilege(p));
        }
        match c {
            'k' => Some(ChannelMode::Key),
            'l' => Some(ChannelMode::UserLimit),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            ChannelMode::Boolean(b) => b.letter(),
            ChannelMode::Key => 'k',
            ChannelMode::UserLimit => 'l',
            ChannelMode::Mask(m) => m.letter(),
            ChannelMode::Privilege(p) => p.letter(),
        }
    }

    /// Whether this mode kind takes an argument when adding/removing it.
    pub fn takes_arg(self) -> bool {
        !matches!(self, ChannelMode::Boolean(_))
    }
}

/// Add, Remove or List (the bare query form used for mask lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Add,
    Remove,
    List,
}

/// One requested mode mutation, as parsed off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelModeChange {
    pub mode: ChannelMode,
    pub op: ChangeOp,
    pub arg: Option<String>,
}

impl ChannelModeChange {
    pub fn new(mode: ChannelMode, op: ChangeOp, arg: Option<String>) -> Self {
        ChannelModeChange { mode, op, arg }
    }
}

/// The set of privilege-prefix modes a single member currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberModes {
    founder: bool,
    admin: bool,
    operator: bool,
    halfop: bool,
    voice: bool,
}

impl MemberModes {
    pub fn has(self, mode: PrivilegeMode) -> bool {
        match mode {
            PrivilegeMode::Founder => self.founder,
            PrivilegeMode::Admin => self.admin,
            PrivilegeMode::Operator => self.operator,
            PrivilegeMode::Halfop => self.halfop,
            PrivilegeMode::Voice => self.voice,
        }
    }

    /// Sets `mode` to `value`; returns `true` iff the stored value changed.
    pub fn set(&mut self, mode: PrivilegeMode, value: bool) -> bool {
        let slot = match mode {
            PrivilegeMode::Founder => &mut self.founder,
            PrivilegeMode::Admin => &mut self.admin,
            PrivilegeMode::Operator => &mut self.operator,
            PrivilegeMode::Halfop => &mut self.halfop,
            PrivilegeMode::Voice => &mut self.voice,
        };
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    /// The highest privilege mode held, if any, in high-to-low order.
    pub fn highest(self) -> Option<PrivilegeMode> {
        PrivilegeMode::HIGH_TO_LOW.into_iter().find(|m| self.has(*m))
    }

    pub fn is_channel_operator(self) -> bool {
        self.founder || self.admin || self.operator
    }

    /// Whether this member may speak in a `+m` (Moderated) channel.
    ///
    /// Only Voice and plain Operator count here, not Halfop/Admin/Founder —
    /// preserving a known quirk rather than generalizing it to
    /// `is_channel_operator`.
    pub fn can_speak_while_moderated(self) -> bool {
        self.voice || self.operator
    }

    /// Renders the prefix sigil string per the spec's `Prefixes(multiPrefix)`
    /// rule: founder/admin/operator/halfop in that order, then voice;
    /// truncated to the single highest sigil when `multi_prefix` is false.
    pub fn prefixes(self, multi_prefix: bool) -> String {
        let mut out = String::new();
        for mode in PrivilegeMode::HIGH_TO_LOW {
            if self.has(mode) {
                out.push(mode.sigil());
            }
        }
        if !multi_prefix && out.chars().count() > 1 {
            out.truncate(out.chars().next().unwrap().len_utf8());
        }
        out
    }
}

impl fmt::Display for MemberModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixes(true))
    }
}

/// The six channel-wide boolean flags, stored as a small bitset rather than
/// a `HashSet<BooleanMode>` since the set is fixed-size and looked up on
/// every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlags {
    invite_only: bool,
    moderated: bool,
    no_outside: bool,
    op_only_topic: bool,
    persistent: bool,
    secret: bool,
}

impl ChannelFlags {
    pub fn has(self, mode: BooleanMode) -> bool {
        match mode {
            BooleanMode::InviteOnly => self.invite_only,
            BooleanMode::Moderated => self.moderated,
            BooleanMode::NoOutside => self.no_outside,
            BooleanMode::OpOnlyTopic => self.op_only_topic,
            BooleanMode::Persistent => self.persistent,
            BooleanMode::Secret => self.secret,
        }
    }

    /// Sets `mode` to `value`; returns `true` iff the stored value changed.
    pub fn set(&mut self, mode: BooleanMode, value: bool) -> bool {
        let slot = match mode {
            BooleanMode::InviteOnly => &mut self.invite_only,
            BooleanMode::Moderated => &mut self.moderated,
            BooleanMode::NoOutside => &mut self.no_outside,
            BooleanMode::OpOnlyTopic => &mut self.op_only_topic,
            BooleanMode::Persistent => &mut self.persistent,
            BooleanMode::Secret => &mut self.secret,
        };
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    /// Active flag letters in `BooleanMode::ALL` order.
    pub fn letters(self) -> String {
        BooleanMode::ALL.into_iter().filter(|m| self.has(*m)).map(|m| m.letter()).collect()
    }

    /// Parses a letter run like `"ntP"` (as stored by persistence) back into
    /// a flag set, ignoring unrecognized letters.
    pub fn from_letters(letters: &str) -> Self {
        let mut flags = ChannelFlags::default();
        for c in letters.chars() {
            if let Some(mode) = BooleanMode::from_letter(c) {
                flags.set(mode, true);
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_emit_high_to_low_with_multi_prefix() {
        let mut m = MemberModes::default();
        m.set(PrivilegeMode::Operator, true);
        m.set(PrivilegeMode::Voice, true);
        assert_eq!(m.prefixes(true), "@+");
    }

    #[test]
    fn prefixes_truncate_to_highest_without_multi_prefix() {
        let mut m = MemberModes::default();
        m.set(PrivilegeMode::Operator, true);
        m.set(PrivilegeMode::Voice, true);
        assert_eq!(m.prefixes(false), "@");
    }

    #[test]
    fn set_reports_whether_value_changed() {
        let mut m = MemberModes::default();
        assert!(m.set(PrivilegeMode::Voice, true));
        assert!(!m.set(PrivilegeMode::Voice, true));
        assert!(m.set(PrivilegeMode::Voice, false));
        assert!(!m.set(PrivilegeMode::Voice, false));
    }

    #[test]
    fn mode_from_letter_round_trips() {
        for b in BooleanMode::ALL {
            assert_eq!(ChannelMode::from_letter(b.letter()), Some(ChannelMode::Boolean(b)));
        }
        assert_eq!(ChannelMode::from_letter('k'), Some(ChannelMode::Key));
        assert_eq!(ChannelMode::from_letter('l'), Some(ChannelMode::UserLimit));
        assert_eq!(
            ChannelMode::from_letter('b'),
            Some(ChannelMode::Mask(MaskListKind::Ban))
        );
        assert_eq!(
            ChannelMode::from_letter('o'),
            Some(ChannelMode::Privilege(PrivilegeMode::Operator))
        );
        assert_eq!(ChannelMode::from_letter('z'), None);
    }

    #[test]
    fn privilege_ordering_is_high_to_low() {
        assert!(PrivilegeMode::Founder > PrivilegeMode::Admin);
        assert!(PrivilegeMode::Admin > PrivilegeMode::Operator);
        assert!(PrivilegeMode::Operator > PrivilegeMode::Halfop);
        assert!(PrivilegeMode::Halfop > PrivilegeMode::Voice);
    }

    #[test]
    fn channel_flags_letters_round_trip() {
        let mut flags = ChannelFlags::default();
        flags.set(BooleanMode::NoOutside, true);
        flags.set(BooleanMode::Moderated, true);
        flags.set(BooleanMode::OpOnlyTopic, true);
        let letters = flags.letters();
        assert_eq!(letters, "mnt");
        assert_eq!(ChannelFlags::from_letters(&letters), flags);
    }

    #[test]
    fn can_speak_while_moderated_ignores_halfop_admin_founder() {
        let mut halfop = MemberModes::default();
        halfop.set(PrivilegeMode::Halfop, true);
        assert!(!halfop.can_speak_while_moderated());

        let mut admin = MemberModes::default();
        admin.set(PrivilegeMode::Admin, true);
        assert!(!admin.can_speak_while_moderated());

        let mut founder = MemberModes::default();
        founder.set(PrivilegeMode::Founder, true);
        assert!(!founder.can_speak_while_moderated());

        let mut voice = MemberModes::default();
        voice.set(PrivilegeMode::Voice, true);
        assert!(voice.can_speak_while_moderated());

        let mut operator = MemberModes::default();
        operator.set(PrivilegeMode::Operator, true);
        assert!(operator.can_speak_while_moderated());
    }

    #[test]
    fn channel_flags_set_reports_change() {
        let mut flags = ChannelFlags::default();
        assert!(flags.set(BooleanMode::Secret, true));
        assert!(!flags.set(BooleanMode::Secret, true));
        assert!(flags.set(BooleanMode::Secret, false));
    }
}
