//! Local account database parsing (`getent passwd` / `getent group` output).

/// One line of `getent passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// One line of `getent group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Parse `name:x:uid:gid:gecos:home:shell` lines. Malformed lines are skipped.
pub fn parse_passwd(text: &str) -> Vec<Account> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(Account {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                home: fields[5].to_string(),
                shell: fields[6].to_string(),
            })
        })
        .collect()
}

/// Parse `name:x:gid:member,member` lines. Malformed lines are skipped.
pub fn parse_group(text: &str) -> Vec<Group> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 {
                return None;
            }
            let members = fields[3]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            Some(Group {
                name: fields[0].to_string(),
                gid: fields[2].parse().ok()?,
                members,
            })
        })
        .collect()
}

/// Group to select after the owner field changes to `owner`.
///
/// The current group is kept when it is the new owner's primary group or
/// lists the owner as a member; otherwise the owner's primary group is
/// chosen. Unknown owners leave the group untouched.
pub fn group_for_owner(
    owner: &str,
    current_group: &str,
    accounts: &[Account],
    groups: &[Group],
) -> String {
    let Some(account) = accounts.iter().find(|a| a.name == owner) else {
        return current_group.to_string();
    };

    let current = groups.iter().find(|g| g.name == current_group);
    let keeps = current
        .map(|g| g.gid == account.gid || g.members.iter().any(|m| m == owner))
        .unwrap_or(false);
    if keeps {
        return current_group.to_string();
    }

    groups
        .iter()
        .find(|g| g.gid == account.gid)
        .map(|g| g.name.clone())
        .unwrap_or_else(|| current_group.to_string())
}
