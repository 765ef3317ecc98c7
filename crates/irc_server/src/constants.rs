//! IRC numeric reply codes used across registration and the channel
//! subsystem. Codes are kept as the wire string form (e.g. `"332"`) since
//! that's what `Client::send` writes; the `_NB` constants remain for call
//! sites that still want the numeric value.

// --- Connection registration -------------------------------------------

pub const RPL_WELCOME: &str = "001";
pub const RPL_YOURHOST: &str = "002";
pub const RPL_CREATED: &str = "003";
pub const RPL_MYINFO: &str = "004";

pub const RPL_UMODEIS: &str = "221";

pub const ERR_NONICKNAMEGIVEN: &str = "431";
pub const ERR_ERRONEUSNICKNAME: &str = "432";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_ALREADYREGISTRED: &str = "462";

pub const ERR_UMODEUNKNOWNFLAG_NB: u16 = 501;
pub const ERR_UMODEUNKNOWNFLAG_STR: &str = "Unknown MODE flag";
pub const ERR_USERSDONTMATCH_NB: u16 = 502;
pub const ERR_USERSDONTMATCH_STR: &str = "Cannot change mode for other users";

// --- Channel subsystem ---------------------------------------------------

pub const RPL_AWAY: &str = "301";
pub const RPL_INVITING: &str = "341";
pub const RPL_TOPIC: &str = "332";
pub const RPL_NOTOPIC: &str = "331";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const RPL_BANLIST: &str = "367";
pub const RPL_ENDOFBANLIST: &str = "368";
pub const RPL_EXCEPTLIST: &str = "348";
pub const RPL_ENDOFEXCEPTLIST: &str = "349";
pub const RPL_INVITELIST: &str = "346";
pub const RPL_ENDOFINVITELIST: &str = "347";
pub const RPL_LIST: &str = "322";
pub const RPL_LISTEND: &str = "323";

pub const ERR_NOSUCHNICK: &str = "401";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_CANNOTSENDTOCHAN: &str = "404";
pub const ERR_NOTONCHANNEL: &str = "442";
pub const ERR_USERNOTINCHANNEL: &str = "441";
pub const ERR_CHANOPRIVSNEEDED: &str = "482";
pub const ERR_BANNEDFROMCHAN: &str = "474";
pub const ERR_CHANNELISFULL: &str = "471";
pub const ERR_INVITEONLYCHAN: &str = "473";
pub const ERR_BADCHANNELKEY: &str = "475";
pub const ERR_UNKNOWNMODE: &str = "472";
pub const ERR_NOTREGISTERED: &str = "451";

// --- Commands shared across layers ---------------------------------------

// 421    ERR_UNKNOWNCOMMAND
//        "<command> :Unknown command"
pub const ERR_UNKNOWNCOMMAND_NB: u16 = 421;
pub const ERR_UNKNOWNCOMMAND_STR: &str = "Unknown command";
pub const ERR_UNKNOWNCOMMAND: &str = "421";

// 461    ERR_NEEDMOREPARAMS
//        "<command> :Not enough parameters"
//
// Returned by the server by numerous commands to indicate to the client
// that it didn't supply enough parameters.
pub const ERR_NEEDMOREPARAMS_NB: u16 = 461;
pub const ERR_NEEDMOREPARAMS_STR: &str = "Not enough parameters";
pub const ERR_NEEDMOREPARAMS: &str = "461";
