//! POSIX permission bit helpers.

pub const SETUID: u32 = 0o4000;
pub const SETGID: u32 = 0o2000;
pub const STICKY: u32 = 0o1000;

/// Execute bits for owner, group and other.
pub const EXECUTE_ALL: u32 = 0o111;

const DESCRIPTIONS: [&str; 8] = [
    "None",
    "Execute-only",
    "Write-only",
    "Write and execute",
    "Read-only",
    "Read and execute",
    "Read and write",
    "Read, write, and execute",
];

/// Description of a single rwx triplet (only the low three bits are used).
pub fn describe(bits: u32) -> &'static str {
    DESCRIPTIONS[(bits & 0o7) as usize]
}

/// Permission triplets as `ls` renders them, separated by spaces:
/// `rwx r-s --T` and so on, honouring setuid, setgid and sticky.
pub fn short_str(mode: u32) -> String {
    let special = (mode >> 9) & 0b111;
    let mut triplets = Vec::with_capacity(3);

    for i in (0..3).rev() {
        let offset = i * 3;
        let mut s = String::with_capacity(3);
        s.push(if mode & (1 << (offset + 2)) != 0 { 'r' } else { '-' });
        s.push(if mode & (1 << (offset + 1)) != 0 { 'w' } else { '-' });

        let exec = mode & (1 << offset) != 0;
        let has_special = special & (1 << i) != 0;
        s.push(match (exec, has_special, i) {
            (true, true, 0) => 't',
            (true, true, _) => 's',
            (true, false, _) => 'x',
            (false, true, 0) => 'T',
            (false, true, _) => 'S',
            (false, false, _) => '-',
        });
        triplets.push(s);
    }

    triplets.join(" ")
}

/// Whether the execute bit is set for all three classes.
pub fn is_executable(mode: u32) -> bool {
    mode & EXECUTE_ALL == EXECUTE_ALL
}

/// Symbolic `chmod` argument for applying `mode` recursively.
///
/// Numeric modes cannot express `X` (execute only for directories and for
/// files that are already executable), so the mode is spelled out per class,
/// e.g. `0o755` becomes `u+rwX,g+rX-w,o+rX-w`. Removal uses lowercase `x`.
pub fn chmod_symbolic_args(mode: u32) -> String {
    const CLASSES: [(u32, char); 3] = [(6, 'u'), (3, 'g'), (0, 'o')];
    const LETTERS: [(u32, char); 3] = [(4, 'r'), (2, 'w'), (1, 'X')];

    let mut parts = Vec::with_capacity(3);
    for (offset, class) in CLASSES {
        let bits = (mode >> offset) & 0o7;
        let mut add = String::new();
        let mut remove = String::new();

        for (digit, letter) in LETTERS {
            if bits & digit == digit {
                add.push(letter);
            } else {
                remove.push(letter.to_ascii_lowercase());
            }
        }

        let mut part = class.to_string();
        if !add.is_empty() {
            part.push('+');
            part.push_str(&add);
        }
        if !remove.is_empty() {
            part.push('-');
            part.push_str(&remove);
        }
        parts.push(part);
    }

    parts.join(",")
}

/// Access level offered for one permission class in the edit dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    NoAccess,
    WriteOnly,
    ReadOnly,
    ReadWrite,
}

impl Access {
    /// Classify a triplet, ignoring its execute bit.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0o6 {
            0 => Self::NoAccess,
            2 => Self::WriteOnly,
            4 => Self::ReadOnly,
            _ => Self::ReadWrite,
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            Self::NoAccess => 0,
            Self::WriteOnly => 2,
            Self::ReadOnly => 4,
            Self::ReadWrite => 6,
        }
    }
}

/// Replace one class's triplet in `mode`.
///
/// `shift` is 6, 3 or 0 for owner, group, other. The execute bit is added
/// for executable regular files, and for directories unless access is
/// removed entirely, so that directories stay traversable.
pub fn with_access(mode: u32, shift: u32, access: Access, is_dir: bool, executable: bool) -> u32 {
    let mut bits = access.bits();
    if (!is_dir && executable) || (is_dir && access != Access::NoAccess) {
        bits += 1;
    }
    (mode & !(0o7 << shift)) | (bits << shift)
}
