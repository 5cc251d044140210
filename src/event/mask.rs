use std::fmt;
use std::ops::BitAnd;
use std::ops::BitAndAssign;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use std::ops::Not;

/// Bit set of event kinds.
///
/// Bit values match the Linux inotify ABI so raw masks pass through without
/// translation. `MOVED_FROM_TO` is synthetic: it sits in a bit the kernel never
/// sets and flags a move merged from a moved-from/moved-to pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);

    pub const ACCESS: EventMask = EventMask(0x0000_0001);
    pub const MODIFY: EventMask = EventMask(0x0000_0002);
    pub const ATTRIB: EventMask = EventMask(0x0000_0004);
    pub const CLOSE_WRITE: EventMask = EventMask(0x0000_0008);
    pub const CLOSE_NOWRITE: EventMask = EventMask(0x0000_0010);
    pub const OPEN: EventMask = EventMask(0x0000_0020);
    pub const MOVED_FROM: EventMask = EventMask(0x0000_0040);
    pub const MOVED_TO: EventMask = EventMask(0x0000_0080);
    pub const CREATE: EventMask = EventMask(0x0000_0100);
    pub const DELETE: EventMask = EventMask(0x0000_0200);
    pub const DELETE_SELF: EventMask = EventMask(0x0000_0400);
    pub const MOVE_SELF: EventMask = EventMask(0x0000_0800);

    pub const UNMOUNT: EventMask = EventMask(0x0000_2000);
    pub const Q_OVERFLOW: EventMask = EventMask(0x0000_4000);
    pub const IGNORED: EventMask = EventMask(0x0000_8000);

    /// Synthetic: a merged rename
    pub const MOVED_FROM_TO: EventMask = EventMask(0x0001_0000);

    /// Subject of the event is a directory
    pub const ISDIR: EventMask = EventMask(0x4000_0000);

    /// Both rename halves
    pub const MOVE: EventMask = EventMask(Self::MOVED_FROM.0 | Self::MOVED_TO.0);

    /// Events the recursive manager needs regardless of what the user asked for
    pub const SUBTREE_MAINTENANCE: EventMask = EventMask(
        Self::CREATE.0 | Self::DELETE.0 | Self::MOVED_FROM.0 | Self::MOVED_TO.0,
    );

    /// Everything a user can meaningfully ask for on a directory watch
    pub const ALL_EVENTS: EventMask = EventMask(0x0000_0fff | Self::MOVED_FROM_TO.0);

    /// Bits that may be passed to the kernel on registration
    const KERNEL_WATCHABLE: u32 = 0x0000_0fff;

    const NAMES: [(EventMask, &'static str); 17] = [
        (Self::ACCESS, "ACCESS"),
        (Self::MODIFY, "MODIFY"),
        (Self::ATTRIB, "ATTRIB"),
        (Self::CLOSE_WRITE, "CLOSE_WRITE"),
        (Self::CLOSE_NOWRITE, "CLOSE_NOWRITE"),
        (Self::OPEN, "OPEN"),
        (Self::MOVED_FROM, "MOVED_FROM"),
        (Self::MOVED_TO, "MOVED_TO"),
        (Self::CREATE, "CREATE"),
        (Self::DELETE, "DELETE"),
        (Self::DELETE_SELF, "DELETE_SELF"),
        (Self::MOVE_SELF, "MOVE_SELF"),
        (Self::UNMOUNT, "UNMOUNT"),
        (Self::Q_OVERFLOW, "Q_OVERFLOW"),
        (Self::IGNORED, "IGNORED"),
        (Self::MOVED_FROM_TO, "MOVED_FROM_TO"),
        (Self::ISDIR, "ISDIR"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set
    pub const fn contains(
        self,
        other: EventMask,
    ) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one bit is shared
    pub const fn intersects(
        self,
        other: EventMask,
    ) -> bool {
        self.0 & other.0 != 0
    }

    /// Mask handed to the raw primitive: the user's request widened with the
    /// events subtree maintenance depends on, minus anything synthetic.
    pub const fn watcher_mask(self) -> EventMask {
        EventMask((self.0 | Self::SUBTREE_MAINTENANCE.0) & Self::KERNEL_WATCHABLE)
    }

    pub const fn is_dir(self) -> bool {
        self.intersects(Self::ISDIR)
    }

    pub const fn is_create(self) -> bool {
        self.intersects(Self::CREATE)
    }

    pub const fn is_delete(self) -> bool {
        self.intersects(Self::DELETE)
    }

    pub const fn is_moved_from(self) -> bool {
        self.intersects(Self::MOVED_FROM)
    }

    pub const fn is_moved_to(self) -> bool {
        self.intersects(Self::MOVED_TO)
    }

    pub const fn is_move(self) -> bool {
        self.intersects(Self::MOVED_FROM_TO)
    }

    pub const fn is_ignored(self) -> bool {
        self.intersects(Self::IGNORED)
    }

    pub const fn is_overflow(self) -> bool {
        self.intersects(Self::Q_OVERFLOW)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(
        self,
        rhs: EventMask,
    ) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(
        &mut self,
        rhs: EventMask,
    ) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(
        self,
        rhs: EventMask,
    ) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for EventMask {
    fn bitand_assign(
        &mut self,
        rhs: EventMask,
    ) {
        self.0 &= rhs.0;
    }
}

impl Not for EventMask {
    type Output = EventMask;

    fn not(self) -> EventMask {
        EventMask(!self.0)
    }
}

impl From<u32> for EventMask {
    fn from(bits: u32) -> Self {
        EventMask(bits)
    }
}

impl fmt::Display for EventMask {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EMPTY");
        }

        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                rest &= !flag.0;
            }
        }

        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:#x}", rest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventMask {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "EventMask({})", self)
    }
}
